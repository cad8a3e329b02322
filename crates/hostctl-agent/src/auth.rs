//! Caller authorization

use hostctl_proto::CallerId;

/// Single-caller authorization gate
#[derive(Debug, Clone, Copy)]
pub struct Authorizer {
    /// The only caller allowed to issue commands
    allowed: CallerId,
}

impl Authorizer {
    /// Gate that admits only `allowed`
    pub fn new(allowed: CallerId) -> Self {
        Self { allowed }
    }

    /// Whether `caller` may issue commands
    pub fn authorize(&self, caller: CallerId) -> bool {
        caller == self.allowed
    }
}
