// ── External media session seam ──
//
// Audio/video runs in a separate real-time media client. The coordinator
// only needs to know which instance hosts the live call so it can end
// the call when that instance disconnects.

use futures_util::future::BoxFuture;

use crate::model::InstanceId;

pub trait MediaSession: Send + Sync {
    /// Instance hosting the live call, if any.
    fn hosted_on(&self) -> Option<InstanceId>;

    /// Leave the call and release devices.
    fn leave(&self) -> BoxFuture<'static, ()>;
}
