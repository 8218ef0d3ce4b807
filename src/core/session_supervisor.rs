//! 会话监管：取消令牌
//!
//! 持有会话级 CancellationToken；每个任务使用子 token，可单独取消，也随会话一起取消。

use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 取消会话内全部任务（Ctrl+C）
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 创建子 token（用于单个任务）
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_tokens_follow_session() {
        let session = SessionSupervisor::new();
        let a = session.child_token();
        let b = session.child_token();
        a.cancel();
        assert!(!b.is_cancelled());
        session.cancel();
        assert!(b.is_cancelled());
        assert!(session.is_cancelled());
    }
}
