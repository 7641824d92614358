//! 处理结果台账
//!
//! 按"记录 × 阶段"保存步骤状态，按记录保存消息：
//!
//! - 消息只追加不覆盖，按步骤顺序以空格连接
//! - 同一步骤一旦进入终态，就不会再被调用或改写

use std::fmt;

use tracing::warn;

/// 处理阶段（按执行顺序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Lookup,
    Annotate,
    Close,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Lookup, Stage::Annotate, Stage::Close];

    fn index(self) -> usize {
        match self {
            Stage::Lookup => 0,
            Stage::Annotate => 1,
            Stage::Close => 2,
        }
    }

    /// 对应的远程事务代码
    pub fn tcode(self) -> &'static str {
        match self {
            Stage::Lookup => "VA03",
            Stage::Annotate => "FB03",
            Stage::Close => "QM02",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tcode())
    }
}

/// 单个步骤的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepState {
    #[default]
    NotStarted,
    Attempting,
    Succeeded,
    Skipped,
    FailedTerminal,
}

impl StepState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepState::Succeeded | StepState::Skipped | StepState::FailedTerminal
        )
    }
}

#[derive(Debug, Clone, Default)]
struct Entry {
    steps: [StepState; 3],
    messages: Vec<String>,
}

/// 处理结果台账，下标与记录顺序一致
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: Vec<Entry>,
}

impl Ledger {
    pub fn new(records: usize) -> Self {
        Self {
            entries: vec![Entry::default(); records],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn state(&self, index: usize, stage: Stage) -> StepState {
        self.entries
            .get(index)
            .map(|e| e.steps[stage.index()])
            .unwrap_or_default()
    }

    /// 开始一个步骤
    ///
    /// 步骤已处于终态时返回 `false`，调用方不应再执行该步骤。
    pub fn begin(&mut self, index: usize, stage: Stage) -> bool {
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        let step = &mut entry.steps[stage.index()];
        if step.is_terminal() {
            return false;
        }
        *step = StepState::Attempting;
        true
    }

    pub fn succeed(&mut self, index: usize, stage: Stage, message: Option<&str>) -> bool {
        self.finish(index, stage, StepState::Succeeded, message)
    }

    pub fn skip(&mut self, index: usize, stage: Stage, message: &str) -> bool {
        self.finish(index, stage, StepState::Skipped, Some(message))
    }

    pub fn fail(&mut self, index: usize, stage: Stage, message: &str) -> bool {
        self.finish(index, stage, StepState::FailedTerminal, Some(message))
    }

    fn finish(
        &mut self,
        index: usize,
        stage: Stage,
        state: StepState,
        message: Option<&str>,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(index) else {
            warn!("台账中没有第 {} 条记录", index);
            return false;
        };

        let step = &mut entry.steps[stage.index()];
        if step.is_terminal() {
            warn!(
                "记录 {} 的 {} 步骤已是终态 {:?}，忽略 {:?}",
                index, stage, step, state
            );
            return false;
        }
        *step = state;

        if let Some(message) = message.map(str::trim).filter(|m| !m.is_empty()) {
            entry.messages.push(message.to_string());
        }
        true
    }

    pub fn messages(&self, index: usize) -> &[String] {
        self.entries
            .get(index)
            .map(|e| e.messages.as_slice())
            .unwrap_or_default()
    }

    /// 记录的完整结果消息
    pub fn outcome(&self, index: usize) -> String {
        self.messages(index).join(" ")
    }

    /// 记录是否有步骤以失败告终（业务警告或业务错误）
    pub fn has_failure(&self, index: usize) -> bool {
        Stage::ALL
            .iter()
            .any(|stage| self.state(index, *stage) == StepState::FailedTerminal)
    }

    /// 记录是否被任一阶段处理过
    pub fn touched(&self, index: usize) -> bool {
        Stage::ALL
            .iter()
            .any(|stage| self.state(index, *stage) != StepState::NotStarted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_appended_in_order() {
        let mut ledger = Ledger::new(1);

        assert!(ledger.begin(0, Stage::Lookup));
        ledger.fail(0, Stage::Lookup, "The credit note does not exist yet in the system.");
        ledger.skip(0, Stage::Annotate, "Document skipped.");

        assert_eq!(
            ledger.outcome(0),
            "The credit note does not exist yet in the system. Document skipped."
        );
        assert_eq!(ledger.state(0, Stage::Annotate), StepState::Skipped);
    }

    #[test]
    fn test_terminal_state_is_never_overwritten() {
        let mut ledger = Ledger::new(1);

        assert!(ledger.begin(0, Stage::Annotate));
        assert!(ledger.succeed(0, Stage::Annotate, Some("Document updated.")));
        assert!(!ledger.begin(0, Stage::Annotate));
        assert!(!ledger.fail(0, Stage::Annotate, "late error"));

        assert_eq!(ledger.state(0, Stage::Annotate), StepState::Succeeded);
        assert_eq!(ledger.outcome(0), "Document updated.");
    }

    #[test]
    fn test_success_without_message() {
        let mut ledger = Ledger::new(2);

        ledger.begin(1, Stage::Lookup);
        ledger.succeed(1, Stage::Lookup, None);

        assert!(ledger.messages(1).is_empty());
        assert!(ledger.touched(1));
        assert!(!ledger.touched(0));
        assert!(!ledger.has_failure(1));

        ledger.begin(1, Stage::Close);
        ledger.fail(1, Stage::Close, "Status check error!");
        assert!(ledger.has_failure(1));
    }

    #[test]
    fn test_out_of_range_index_is_ignored() {
        let mut ledger = Ledger::new(1);
        assert!(!ledger.begin(3, Stage::Close));
        assert!(!ledger.fail(3, Stage::Close, "x"));
        assert_eq!(ledger.outcome(3), "");
        assert_eq!(ledger.state(3, Stage::Close), StepState::NotStarted);
    }
}
