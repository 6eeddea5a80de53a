//! 规则存储管理
//!
//! 使用 DashMap 提供线程安全的规则缓存。规则在装载时编译，
//! 正则等预编译产物随编译结果缓存，仅在规则更新时失效；
//! 规则集只是有序的 ID 引用列表，按原样存储。

use crate::compiler::{CompiledRule, RuleCompiler};
use crate::error::{Result, RuleError};
use crate::models::{Rule, RuleSet};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 规则存储
#[derive(Clone)]
pub struct RuleStore {
    /// 编译后的规则缓存
    rules: Arc<DashMap<String, CompiledRule>>,
    /// 规则集注册表
    sets: Arc<DashMap<String, RuleSet>>,
    /// 规则编译器
    compiler: Arc<parking_lot::Mutex<RuleCompiler>>,
}

impl RuleStore {
    /// 创建新的规则存储
    pub fn new() -> Self {
        Self {
            rules: Arc::new(DashMap::new()),
            sets: Arc::new(DashMap::new()),
            compiler: Arc::new(parking_lot::Mutex::new(RuleCompiler::new())),
        }
    }

    /// 获取当前存储的规则数量
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// 检查存储是否为空
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 加载规则（从 Rule 对象）
    ///
    /// 装载即编译：校验不通过的规则不会进入存储。
    #[instrument(skip(self, rule), fields(rule_id = %rule.id, rule_name = %rule.name))]
    pub fn load(&self, rule: Rule) -> Result<()> {
        let compiled = {
            let mut compiler = self.compiler.lock();
            compiler.compile(rule)?
        };

        let rule_id = compiled.id().to_string();
        self.rules.insert(rule_id.clone(), compiled);

        info!("规则已加载: {}", rule_id);
        Ok(())
    }

    /// 加载规则（从 JSON 字符串）
    #[instrument(skip(self, json))]
    pub fn load_from_json(&self, json: &str) -> Result<String> {
        let compiled = {
            let mut compiler = self.compiler.lock();
            compiler.compile_from_json(json)?
        };

        let rule_id = compiled.id().to_string();
        self.rules.insert(rule_id.clone(), compiled);

        info!("规则已加载: {}", rule_id);
        Ok(rule_id)
    }

    /// 更新规则
    ///
    /// 重新编译并替换缓存条目，旧的预编译正则随之失效。
    #[instrument(skip(self, rule), fields(rule_id = %rule.id))]
    pub fn update(&self, rule: Rule) -> Result<()> {
        let rule_id = rule.id.clone();

        if !self.rules.contains_key(&rule_id) {
            warn!("更新不存在的规则: {}", rule_id);
            return Err(RuleError::RuleNotFound(rule_id));
        }

        self.load(rule)
    }

    /// 删除规则
    ///
    /// 引用该规则的规则集不做级联处理，悬空引用在评估时跳过。
    #[instrument(skip(self))]
    pub fn delete(&self, rule_id: &str) -> Result<()> {
        if self.rules.remove(rule_id).is_some() {
            info!("规则已删除: {}", rule_id);
            Ok(())
        } else {
            warn!("删除不存在的规则: {}", rule_id);
            Err(RuleError::RuleNotFound(rule_id.to_string()))
        }
    }

    /// 获取规则
    pub fn get(&self, rule_id: &str) -> Option<CompiledRule> {
        self.rules.get(rule_id).map(|r| r.clone())
    }

    /// 检查规则是否存在
    pub fn contains(&self, rule_id: &str) -> bool {
        self.rules.contains_key(rule_id)
    }

    /// 获取所有规则 ID
    pub fn list_ids(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.key().clone()).collect()
    }

    /// 获取所有规则
    pub fn list_all(&self) -> Vec<CompiledRule> {
        self.rules.iter().map(|r| r.value().clone()).collect()
    }

    /// 批量加载规则
    ///
    /// 单条失败不影响其余规则，失败明细汇总告警。
    #[instrument(skip(self, rules))]
    pub fn load_batch(&self, rules: Vec<Rule>) -> Result<Vec<String>> {
        let mut loaded_ids = Vec::with_capacity(rules.len());
        let mut errors = Vec::new();

        for rule in rules {
            let rule_id = rule.id.clone();
            match self.load(rule) {
                Ok(()) => loaded_ids.push(rule_id),
                Err(e) => errors.push((rule_id, e)),
            }
        }

        if !errors.is_empty() {
            warn!("批量加载部分失败: {:?}", errors);
        }

        info!(
            "批量加载完成: {} 成功, {} 失败",
            loaded_ids.len(),
            errors.len()
        );
        Ok(loaded_ids)
    }

    /// 清空所有规则与规则集
    #[instrument(skip(self))]
    pub fn clear(&self) {
        let count = self.rules.len();
        self.rules.clear();
        self.sets.clear();
        info!("已清空 {} 条规则", count);
    }

    /// 注册规则集
    ///
    /// 引用的规则 ID 不要求此刻存在（规则集与规则独立管理）。
    #[instrument(skip(self, set), fields(set_id = %set.id, set_name = %set.name))]
    pub fn load_set(&self, set: RuleSet) -> Result<()> {
        if set.id.is_empty() {
            return Err(RuleError::ParseError("规则集 ID 不能为空".to_string()));
        }

        let dangling: Vec<&String> = set
            .rules
            .iter()
            .filter(|id| !self.rules.contains_key(id.as_str()))
            .collect();
        if !dangling.is_empty() {
            warn!("规则集包含暂未加载的规则引用: {:?}", dangling);
        }

        info!("规则集已加载: {}", set.id);
        self.sets.insert(set.id.clone(), set);
        Ok(())
    }

    /// 获取规则集
    pub fn get_set(&self, set_id: &str) -> Option<RuleSet> {
        self.sets.get(set_id).map(|s| s.clone())
    }

    /// 删除规则集
    #[instrument(skip(self))]
    pub fn delete_set(&self, set_id: &str) -> Result<()> {
        if self.sets.remove(set_id).is_some() {
            info!("规则集已删除: {}", set_id);
            Ok(())
        } else {
            Err(RuleError::RuleSetNotFound(set_id.to_string()))
        }
    }

    /// 获取所有规则集 ID
    pub fn list_set_ids(&self) -> Vec<String> {
        self.sets.iter().map(|s| s.key().clone()).collect()
    }

    /// 获取规则统计信息
    pub fn stats(&self) -> RuleStoreStats {
        let rules_count = self.rules.len();
        let total_fields: usize = self.rules.iter().map(|r| r.required_fields.len()).sum();

        RuleStoreStats {
            rules_count,
            sets_count: self.sets.len(),
            total_fields,
            avg_fields_per_rule: if rules_count > 0 {
                total_fields as f64 / rules_count as f64
            } else {
                0.0
            },
        }
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 规则存储统计信息
#[derive(Debug, Clone)]
pub struct RuleStoreStats {
    /// 规则总数
    pub rules_count: usize,
    /// 规则集总数
    pub sets_count: usize,
    /// 所有规则使用的字段总数
    pub total_fields: usize,
    /// 平均每条规则使用的字段数
    pub avg_fields_per_rule: f64,
}
