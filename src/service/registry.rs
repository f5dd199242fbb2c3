use indexmap::IndexMap;
use std::sync::Arc;

use crate::config::{AppConfig, ChannelConfig};
use crate::error::ReconcileError;
use crate::models::LedgerColumn;
use crate::service::normalizer::{Normalizer, ProductCatalog};
use crate::service::sources::{build_source, OrderSource};

/// 渠道描述: {name, table, date_column, 拉取函数} + 归一化规则
pub struct ChannelDescriptor {
    pub config: ChannelConfig,
    pub normalizer: Normalizer,
    pub source: Arc<dyn OrderSource>,
}

impl ChannelDescriptor {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn table(&self) -> &str {
        &self.config.table
    }

    pub fn date_column(&self) -> &str {
        &self.config.date_column
    }

    pub fn ledger_column(&self) -> LedgerColumn {
        self.config.ledger_column
    }
}

/// 渠道注册表 (按配置顺序)
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: IndexMap<String, Arc<ChannelDescriptor>>,
}

impl ChannelRegistry {
    /// 按配置构建, 订单来源由 SourceConfig 决定
    pub fn from_config(config: &AppConfig) -> Self {
        Self::with_sources(config, |ch| build_source(&ch.source))
    }

    /// 自定义订单来源 (预拉取数据 / 测试)
    pub fn with_sources<F>(config: &AppConfig, mut make_source: F) -> Self
    where
        F: FnMut(&ChannelConfig) -> Arc<dyn OrderSource>,
    {
        let catalog = Arc::new(ProductCatalog::from_entries(&config.products));
        let channels = config
            .channels
            .iter()
            .map(|ch| {
                let descriptor = ChannelDescriptor {
                    config: ch.clone(),
                    normalizer: Normalizer::new(ch.vendor, &ch.excluded_statuses, catalog.clone()),
                    source: make_source(ch),
                };
                (ch.name.clone(), Arc::new(descriptor))
            })
            .collect();
        Self { channels }
    }

    pub fn get(&self, name: &str) -> Result<&Arc<ChannelDescriptor>, ReconcileError> {
        self.channels
            .get(name)
            .ok_or_else(|| ReconcileError::UnknownChannel(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ChannelDescriptor>> {
        self.channels.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    /// 写入同一账本列的所有渠道
    pub fn for_column(&self, column: LedgerColumn) -> impl Iterator<Item = &Arc<ChannelDescriptor>> {
        self.channels.values().filter(move |c| c.ledger_column() == column)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
