//! 状态转换规则表
//!
//! 与存储无关的纯函数，便于单独测试。

use orchestrator_core::models::{State, StateType};

/// 规则表对 (当前状态, 提议状态) 的判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRule {
    Allow,
    Deny,
}

/// 对一次提议的完整判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionDecision {
    /// 写入新状态
    Accept,
    /// 提议与当前状态等价，不写入
    NoOp,
    /// 规则表不允许
    Reject,
    /// 当前状态为终态
    TerminalViolation,
}

/// 普通路径的转换规则
pub fn transition_rule(from: StateType, to: StateType) -> TransitionRule {
    use StateType::*;

    if from.is_terminal() {
        return TransitionRule::Deny;
    }

    let allowed = match (from, to) {
        // 重新调度
        (Scheduled, Scheduled) => true,
        (Scheduled, Pending) => true,
        (Scheduled, Cancelling | Cancelled | Crashed) => true,

        (Pending, Running) => true,
        (Pending, Scheduled) => true,
        (Pending, Paused) => true,
        (Pending, Cancelling | Cancelled | Crashed | Failed) => true,

        (Running, Completed | Failed | Crashed) => true,
        (Running, Paused) => true,
        // 重试等待
        (Running, Scheduled) => true,
        (Running, Cancelling | Cancelled) => true,

        // 恢复
        (Paused, Running | Pending) => true,
        (Paused, Scheduled) => true,
        (Paused, Cancelling | Cancelled | Crashed | Failed) => true,

        (Cancelling, Cancelled) => true,
        // 取消前已经结束
        (Cancelling, Completed | Failed | Crashed) => true,

        _ => false,
    };

    if allowed {
        TransitionRule::Allow
    } else {
        TransitionRule::Deny
    }
}

/// 判定一次状态提议
///
/// 判定顺序：
/// 1. 与当前状态等价 → `NoOp`（终态同样适用，保证重放幂等）
/// 2. 当前为终态 → `TerminalViolation`（强制转换也不例外）
/// 3. `force` → `Accept`
/// 4. 查规则表
pub fn validate_transition(current: &State, proposed: &State, force: bool) -> TransitionDecision {
    if current.is_equivalent(proposed) {
        return TransitionDecision::NoOp;
    }

    if current.is_terminal() {
        return TransitionDecision::TerminalViolation;
    }

    if force {
        return TransitionDecision::Accept;
    }

    match transition_rule(current.state_type, proposed.state_type) {
        TransitionRule::Allow => TransitionDecision::Accept,
        TransitionRule::Deny => TransitionDecision::Reject,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_happy_path_is_allowed() {
        use StateType::*;
        let path = [Scheduled, Pending, Running, Paused, Running, Completed];
        for pair in path.windows(2) {
            assert_eq!(
                transition_rule(pair[0], pair[1]),
                TransitionRule::Allow,
                "{} -> {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_terminal_states_deny_everything() {
        for from in StateType::ALL.iter().filter(|t| t.is_terminal()) {
            for to in StateType::ALL {
                assert_eq!(transition_rule(*from, to), TransitionRule::Deny);
            }
        }
    }

    #[test]
    fn test_denied_pairs() {
        use StateType::*;
        assert_eq!(transition_rule(Scheduled, Completed), TransitionRule::Deny);
        assert_eq!(transition_rule(Scheduled, Running), TransitionRule::Deny);
        assert_eq!(transition_rule(Running, Running), TransitionRule::Deny);
        assert_eq!(transition_rule(Paused, Completed), TransitionRule::Deny);
        assert_eq!(transition_rule(Cancelling, Running), TransitionRule::Deny);
    }

    #[test]
    fn test_equivalent_proposal_is_noop_even_when_terminal() {
        let current = State::failed("The flow was paused and never resumed.");
        let replay = State::failed("The flow was paused and never resumed.");
        assert_eq!(
            validate_transition(&current, &replay, false),
            TransitionDecision::NoOp
        );
        assert_eq!(
            validate_transition(&current, &replay, true),
            TransitionDecision::NoOp
        );
    }

    #[test]
    fn test_terminal_rejects_forced_and_normal() {
        for terminal in [
            State::completed(),
            State::failed("boom"),
            State::crashed("oom"),
            State::cancelled(),
        ] {
            for proposed in [State::running(), State::pending(), State::failed("other")] {
                assert_eq!(
                    validate_transition(&terminal, &proposed, false),
                    TransitionDecision::TerminalViolation
                );
                assert_eq!(
                    validate_transition(&terminal, &proposed, true),
                    TransitionDecision::TerminalViolation
                );
            }
        }
    }

    #[test]
    fn test_force_bypasses_rule_table() {
        let current = State::scheduled(Utc::now());
        let proposed = State::completed();
        assert_eq!(
            validate_transition(&current, &proposed, false),
            TransitionDecision::Reject
        );
        assert_eq!(
            validate_transition(&current, &proposed, true),
            TransitionDecision::Accept
        );
    }

    #[test]
    fn test_paused_to_failed_allowed_normally() {
        let current = State::paused(Some(Utc::now()), false);
        assert_eq!(
            validate_transition(&current, &State::failed("expired"), false),
            TransitionDecision::Accept
        );
    }
}
