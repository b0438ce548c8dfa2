//! Context traits for dependency injection
//!
//! These traits abstract away the parts of the environment that make the
//! bootstrap logic slow or host-dependent, so pollers and retriers can be
//! exercised without waiting in real time.

use std::time::Duration;

/// Blocking pause between poll or retry attempts
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// `Sleeper` that blocks the current thread
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Cluster membership status as reported by the node registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberStatus {
    Member,
    /// Configured but unreachable; still counts toward cluster size
    Lost,
    Other(String),
}

impl MemberStatus {
    pub fn counts_toward_size(&self) -> bool {
        matches!(self, MemberStatus::Member | MemberStatus::Lost)
    }
}

impl From<&str> for MemberStatus {
    fn from(s: &str) -> Self {
        match s {
            "member" => MemberStatus::Member,
            "lost" => MemberStatus::Lost,
            other => MemberStatus::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberStatus::Member => write!(f, "member"),
            MemberStatus::Lost => write!(f, "lost"),
            MemberStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_status_parse() {
        assert_eq!(MemberStatus::from("member"), MemberStatus::Member);
        assert_eq!(MemberStatus::from("lost"), MemberStatus::Lost);
        assert_eq!(
            MemberStatus::from("offline"),
            MemberStatus::Other("offline".to_string())
        );
    }

    #[test]
    fn test_member_status_counts() {
        assert!(MemberStatus::Member.counts_toward_size());
        assert!(MemberStatus::Lost.counts_toward_size());
        assert!(!MemberStatus::Other("offline".into()).counts_toward_size());
        assert_eq!(format!("{}", MemberStatus::Other("offline".into())), "offline");
    }
}
