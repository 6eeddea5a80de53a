//! 行为风险规则引擎
//!
//! 提供可复用的规则评估能力，支持：
//! - JSON 规则定义（条件 / AND·OR·NOT 逻辑组树）与解析
//! - 规则校验、编译与正则预编译缓存
//! - 短路求值执行，故障失败关闭并记入诊断
//! - 风险分值、动作集合与字段审计
//! - 规则集的有序批量评估
//!
//! 引擎是纯计算库：不负责规则持久化、候选过滤与动作派发，
//! 这些由上层系统完成。

pub mod compiler;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod models;
pub mod operators;
pub mod store;

pub use compiler::{CompiledRule, RuleCompiler, ValidationIssue, MAX_GROUP_DEPTH};
pub use engine::RuleEngine;
pub use error::{Result, RuleError};
pub use evaluator::ConditionEvaluator;
pub use executor::{EvaluationPolicy, RuleExecutor};
pub use models::{
    Action, Condition, ConditionGroup, EvaluationContext, EvaluationDiagnostic, MatchedField,
    Rule, RuleEvaluationResult, RuleSet, SetEvaluation, Severity, SkipReason, SkippedRule,
    ValueType,
};
pub use operators::{LogicalOperator, Operator};
pub use store::{RuleStore, RuleStoreStats};
