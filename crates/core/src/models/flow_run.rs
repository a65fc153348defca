use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::{State, StateDetails, StateType};

pub type FlowRunId = Uuid;

/// 流程运行：状态机跟踪的执行单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRun {
    pub id: FlowRunId,
    pub name: String,
    /// 提交到的Worker池队列，队列删除后置空
    pub work_queue_id: Option<Uuid>,
    /// 当前状态（状态历史中的最新一条）
    pub state: State,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl FlowRun {
    pub fn new(name: impl Into<String>, initial_state: State) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            work_queue_id: None,
            state: initial_state,
            created: now,
            updated: now,
        }
    }

    pub fn with_work_queue(mut self, work_queue_id: Uuid) -> Self {
        self.work_queue_id = Some(work_queue_id);
        self
    }

    pub fn state_type(&self) -> StateType {
        self.state.state_type
    }

    pub fn state_timestamp(&self) -> DateTime<Utc> {
        self.state.timestamp
    }

    pub fn state_details(&self) -> &StateDetails {
        &self.state.details
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// 批量查询的续读位置，结果按 (created, id) 升序排列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowRunCursor {
    pub created: DateTime<Utc>,
    pub id: FlowRunId,
}

impl FlowRunCursor {
    pub fn after(run: &FlowRun) -> Self {
        Self {
            created: run.created,
            id: run.id,
        }
    }

    fn precedes(&self, run: &FlowRun) -> bool {
        (self.created, self.id) < (run.created, run.id)
    }
}

/// 流程运行批量查询条件，未设置的条件不参与过滤
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowRunFilter {
    pub state_types: Option<Vec<StateType>>,
    pub work_queue_ids: Option<Vec<Uuid>>,
    pub ids: Option<Vec<FlowRunId>>,
    /// 只返回排在该位置之后的运行
    pub after: Option<FlowRunCursor>,
}

impl FlowRunFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state_type: StateType) -> Self {
        Self {
            state_types: Some(vec![state_type]),
            ..Default::default()
        }
    }

    pub fn state_types(mut self, state_types: Vec<StateType>) -> Self {
        self.state_types = Some(state_types);
        self
    }

    pub fn work_queue_ids(mut self, work_queue_ids: Vec<Uuid>) -> Self {
        self.work_queue_ids = Some(work_queue_ids);
        self
    }

    pub fn ids(mut self, ids: Vec<FlowRunId>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn after(mut self, cursor: FlowRunCursor) -> Self {
        self.after = Some(cursor);
        self
    }

    pub fn matches(&self, run: &FlowRun) -> bool {
        if let Some(cursor) = &self.after {
            if !cursor.precedes(run) {
                return false;
            }
        }
        if let Some(types) = &self.state_types {
            if !types.contains(&run.state.state_type) {
                return false;
            }
        }
        if let Some(queues) = &self.work_queue_ids {
            match run.work_queue_id {
                Some(queue_id) if queues.contains(&queue_id) => {}
                _ => return false,
            }
        }
        if let Some(ids) = &self.ids {
            if !ids.contains(&run.id) {
                return false;
            }
        }
        true
    }
}
