//! Deciding who may trigger debug-info installation.
//!
//! Installing debug-info downloads packages and writes into a cache shared by everybody on
//! the machine, so it is gated per crash owner.

use std::collections::BTreeSet;

use crashsift_service::config::DebugInfoConfig;

/// Decides whether a crash owned by `uid` may install debug-info.
pub trait DebugInfoAuthorizer {
    fn may_install(&self, uid: u32) -> bool;
}

impl<T: DebugInfoAuthorizer + ?Sized> DebugInfoAuthorizer for Box<T> {
    fn may_install(&self, uid: u32) -> bool {
        (**self).may_install(uid)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl DebugInfoAuthorizer for AllowAll {
    fn may_install(&self, _uid: u32) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DenyAll;

impl DebugInfoAuthorizer for DenyAll {
    fn may_install(&self, _uid: u32) -> bool {
        false
    }
}

/// Allows a fixed set of users.
#[derive(Clone, Debug, Default)]
pub struct UidAllowList {
    uids: BTreeSet<u32>,
}

impl UidAllowList {
    pub fn new(uids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            uids: uids.into_iter().collect(),
        }
    }
}

impl DebugInfoAuthorizer for UidAllowList {
    fn may_install(&self, uid: u32) -> bool {
        let allowed = self.uids.contains(&uid);
        if !allowed {
            tracing::info!("UID {} is not authorized to install debuginfos", uid);
        }
        allowed
    }
}

/// The authorizer described by `debug_info.authorized_uids`.
pub fn from_config(debug_info: &DebugInfoConfig) -> Box<dyn DebugInfoAuthorizer + Send + Sync> {
    match &debug_info.authorized_uids {
        Some(uids) => Box::new(UidAllowList::new(uids.iter().copied())),
        None => Box::new(AllowAll),
    }
}
