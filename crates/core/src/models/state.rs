use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 流程运行状态类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StateType {
    #[serde(rename = "SCHEDULED")]
    Scheduled,
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "PAUSED")]
    Paused,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CRASHED")]
    Crashed,
    #[serde(rename = "CANCELLING")]
    Cancelling,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl StateType {
    pub const ALL: [StateType; 9] = [
        StateType::Scheduled,
        StateType::Pending,
        StateType::Running,
        StateType::Paused,
        StateType::Completed,
        StateType::Failed,
        StateType::Crashed,
        StateType::Cancelling,
        StateType::Cancelled,
    ];

    /// 终态：一旦进入不再接受任何转换
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StateType::Completed | StateType::Failed | StateType::Crashed | StateType::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StateType::Scheduled => "SCHEDULED",
            StateType::Pending => "PENDING",
            StateType::Running => "RUNNING",
            StateType::Paused => "PAUSED",
            StateType::Completed => "COMPLETED",
            StateType::Failed => "FAILED",
            StateType::Crashed => "CRASHED",
            StateType::Cancelling => "CANCELLING",
            StateType::Cancelled => "CANCELLED",
        }
    }

    /// 状态的默认展示名称
    pub fn default_name(&self) -> &'static str {
        match self {
            StateType::Scheduled => "Scheduled",
            StateType::Pending => "Pending",
            StateType::Running => "Running",
            StateType::Paused => "Paused",
            StateType::Completed => "Completed",
            StateType::Failed => "Failed",
            StateType::Crashed => "Crashed",
            StateType::Cancelling => "Cancelling",
            StateType::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StateType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid state type: {s}"))
    }
}

impl sqlx::Type<sqlx::Sqlite> for StateType {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for StateType {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse::<StateType>().map_err(Into::into)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for StateType {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 状态附带的结构化数据，字段含义取决于状态类型
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDetails {
    /// Scheduled 状态的计划执行时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<DateTime<Utc>>,
    /// Paused 状态的恢复截止时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_timeout: Option<DateTime<Utc>>,
    /// 恢复时是否需要重新调度
    #[serde(default)]
    pub pause_reschedule: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_key: Option<String>,
}

/// 流程运行的一条状态记录
///
/// 状态记录只追加不覆盖：每次转换都会产生新的记录并成为运行的当前状态。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub state_type: StateType,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub message: Option<String>,
    #[serde(default)]
    pub details: StateDetails,
}

impl State {
    pub fn new(state_type: StateType) -> Self {
        Self {
            id: Uuid::new_v4(),
            state_type,
            name: state_type.default_name().to_string(),
            timestamp: Utc::now(),
            message: None,
            details: StateDetails::default(),
        }
    }

    pub fn scheduled(scheduled_time: DateTime<Utc>) -> Self {
        State::new(StateType::Scheduled).with_details(StateDetails {
            scheduled_time: Some(scheduled_time),
            ..Default::default()
        })
    }

    pub fn pending() -> Self {
        State::new(StateType::Pending)
    }

    pub fn running() -> Self {
        State::new(StateType::Running)
    }

    /// 暂停状态，`pause_timeout` 之后仍未恢复的运行会被自动标记为失败
    pub fn paused(pause_timeout: Option<DateTime<Utc>>, pause_reschedule: bool) -> Self {
        State::new(StateType::Paused).with_details(StateDetails {
            pause_timeout,
            pause_reschedule,
            ..Default::default()
        })
    }

    pub fn completed() -> Self {
        State::new(StateType::Completed)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        State::new(StateType::Failed).with_message(message)
    }

    pub fn crashed(message: impl Into<String>) -> Self {
        State::new(StateType::Crashed).with_message(message)
    }

    pub fn cancelling() -> Self {
        State::new(StateType::Cancelling)
    }

    pub fn cancelled() -> Self {
        State::new(StateType::Cancelled)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_details(mut self, details: StateDetails) -> Self {
        self.details = details;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state_type.is_terminal()
    }

    /// 判断两个状态是否等价（忽略记录ID和时间戳）
    ///
    /// 等价的提议视为幂等重放，不会写入新记录。
    pub fn is_equivalent(&self, other: &State) -> bool {
        self.state_type == other.state_type
            && self.name == other.name
            && self.message == other.message
            && self.details == other.details
    }

    /// 暂停截止时间是否早于 `now`，没有截止时间的暂停永不过期
    pub fn is_pause_expired(&self, now: DateTime<Utc>) -> bool {
        self.state_type == StateType::Paused
            && self
                .details
                .pause_timeout
                .map(|deadline| deadline < now)
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<StateType> = StateType::ALL
            .iter()
            .copied()
            .filter(StateType::is_terminal)
            .collect();
        assert_eq!(
            terminal,
            vec![
                StateType::Completed,
                StateType::Failed,
                StateType::Crashed,
                StateType::Cancelled
            ]
        );
        assert!(!StateType::Cancelling.is_terminal());
        assert!(!StateType::Paused.is_terminal());
    }

    #[test]
    fn test_state_type_parse() {
        for t in StateType::ALL {
            assert_eq!(t.as_str().parse::<StateType>().unwrap(), t);
        }
        assert!("RESUMING".parse::<StateType>().is_err());
    }

    #[test]
    fn test_state_serialization_uses_wire_names() {
        let state = State::failed("boom");
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["type"], "FAILED");
        assert_eq!(json["message"], "boom");
        assert_eq!(json["details"]["pause_reschedule"], false);
        assert!(json["details"].get("pause_timeout").is_none());
    }

    #[test]
    fn test_equivalence_ignores_id_and_timestamp() {
        let a = State::failed("The flow was paused and never resumed.");
        let b = State::failed("The flow was paused and never resumed.")
            .with_timestamp(a.timestamp + Duration::seconds(30));
        assert_ne!(a.id, b.id);
        assert!(a.is_equivalent(&b));

        let c = State::failed("other message");
        assert!(!a.is_equivalent(&c));
    }

    #[test]
    fn test_pause_expiry() {
        let now = Utc::now();
        let expired = State::paused(Some(now - Duration::minutes(1)), false);
        let pending = State::paused(Some(now + Duration::minutes(1)), false);
        let no_deadline = State::paused(None, true);

        assert!(expired.is_pause_expired(now));
        assert!(!pending.is_pause_expired(now));
        assert!(!no_deadline.is_pause_expired(now));
        assert!(!State::running().is_pause_expired(now));
    }
}
