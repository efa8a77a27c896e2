mod classifier;
mod hasher;
mod queue_health;

pub use classifier::{classify, AiVerdict};
pub use hasher::{build_archive, sha256_hex, ArchiveEntry, ContentDigest, ContentHasher, META_FILE_NAME};
pub use queue_health::QueueHealthMonitor;
