//! 记录处理上下文
//!
//! 封装"我正在哪个阶段处理第几条记录"这一信息，只用于日志前缀

use std::fmt::Display;

use crate::models::Stage;

/// 记录处理上下文
#[derive(Debug, Clone)]
pub struct RecordCtx {
    /// 当前阶段
    pub stage: Stage,

    /// 工作表行号
    pub row: usize,

    /// 本阶段内的序号（从 1 开始）
    pub position: usize,

    /// 本阶段待处理的记录总数
    pub total: usize,

    /// 本阶段操作的对象（订单号 / 凭证号 / 通知号）
    pub target: u64,
}

impl RecordCtx {
    pub fn new(stage: Stage, row: usize, position: usize, total: usize, target: u64) -> Self {
        Self {
            stage,
            row,
            position,
            total,
            target,
        }
    }
}

impl Display for RecordCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{} {}/{} 行#{} 对象#{}]",
            self.stage, self.position, self.total, self.row, self.target
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefix() {
        let ctx = RecordCtx::new(Stage::Lookup, 2, 1, 3, 5012233445);
        assert_eq!(ctx.to_string(), "[VA03 1/3 行#2 对象#5012233445]");
    }
}
