//! 权限闸门：能力标签策略、纯函数分类、一次性确认令牌

pub mod gate;
pub mod policy;

pub use gate::{ConfirmationToken, PermissionGate};
pub use policy::{classify, Classification, PermissionDecision, PermissionPolicy};
