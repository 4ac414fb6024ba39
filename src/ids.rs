#[cfg(test)]
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use uuid::Uuid;

const ID_LEN: usize = 16;

/// Stable page id: first 16 hex chars of sha256(url).
pub fn page_id(url: &str) -> String {
    let mut hex = format!("{:x}", Sha256::digest(url.as_bytes()));
    hex.truncate(ID_LEN);
    hex
}

pub trait IdSource: Send + Sync {
    fn variant_id(&self) -> String;
}

pub struct RandomIds;

impl IdSource for RandomIds {
    fn variant_id(&self) -> String {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(ID_LEN);
        id
    }
}

/// Deterministic ids for tests.
#[cfg(test)]
#[derive(Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

#[cfg(test)]
impl IdSource for SequentialIds {
    fn variant_id(&self) -> String {
        format!("{:016x}", self.next.fetch_add(1, Ordering::Relaxed))
    }
}
