//! Streaming content digests used for payload verification.

use sha2::Digest;

/// Digest algorithm recorded in package metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgo {
    /// Legacy 128-bit digests (32 hex characters).
    Md5,
    /// 256-bit digests (64 hex characters).
    Sha256,
}

impl DigestAlgo {
    /// Infers the algorithm from a recorded hex digest's length.
    #[must_use]
    pub const fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            32 => Some(Self::Md5),
            64 => Some(Self::Sha256),
            _ => None,
        }
    }
}

enum Inner {
    Md5(md5::Context),
    Sha256(sha2::Sha256),
}

/// An incremental digest computation.
pub struct DigestCtx {
    inner: Inner,
}

impl std::fmt::Debug for DigestCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.inner {
            Inner::Md5(_) => "md5",
            Inner::Sha256(_) => "sha256",
        };
        f.debug_struct("DigestCtx").field("algo", &name).finish()
    }
}

impl DigestCtx {
    /// Starts a digest computation.
    #[must_use]
    pub fn new(algo: DigestAlgo) -> Self {
        let inner = match algo {
            DigestAlgo::Md5 => Inner::Md5(md5::Context::new()),
            DigestAlgo::Sha256 => Inner::Sha256(sha2::Sha256::new()),
        };
        Self { inner }
    }

    /// Feeds bytes into the digest.
    pub fn update(&mut self, bytes: &[u8]) {
        match &mut self.inner {
            Inner::Md5(ctx) => ctx.consume(bytes),
            Inner::Sha256(ctx) => ctx.update(bytes),
        }
    }

    /// Finishes the computation, returning the lower-case hex digest.
    #[must_use]
    pub fn finish(self) -> String {
        match self.inner {
            Inner::Md5(ctx) => format!("{:x}", ctx.compute()),
            Inner::Sha256(ctx) => hex::encode(ctx.finalize()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_of_known_input() {
        let mut ctx = DigestCtx::new(DigestAlgo::Md5);
        ctx.update(b"hello");
        assert_eq!(ctx.finish(), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn sha256_of_known_input() {
        let mut ctx = DigestCtx::new(DigestAlgo::Sha256);
        ctx.update(b"hello world");
        assert_eq!(
            ctx.finish(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn digest_of_empty_input_matches_the_known_constant() {
        let ctx = DigestCtx::new(DigestAlgo::Md5);
        assert_eq!(ctx.finish(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn incremental_updates_match_one_shot() {
        let mut a = DigestCtx::new(DigestAlgo::Sha256);
        a.update(b"hello ");
        a.update(b"world");
        let mut b = DigestCtx::new(DigestAlgo::Sha256);
        b.update(b"hello world");
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn algorithm_is_inferred_from_digest_width() {
        assert_eq!(DigestAlgo::from_hex_len(32), Some(DigestAlgo::Md5));
        assert_eq!(DigestAlgo::from_hex_len(64), Some(DigestAlgo::Sha256));
        assert_eq!(DigestAlgo::from_hex_len(40), None);
    }
}
