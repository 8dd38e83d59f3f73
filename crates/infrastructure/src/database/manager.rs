use std::sync::Arc;
use std::time::Duration;

use smart_queue_core::{
    config::DatabaseConfig, traits::JobStore, SchedulerError, SchedulerResult,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use super::{InMemoryJobStore, PostgresJobStore};

/// 存储后端
pub enum DatabasePool {
    PostgreSQL(PgPool),
    InMemory(Arc<InMemoryJobStore>),
}

/// 按URL选择存储后端并提供统一的 `JobStore` 句柄
pub struct DatabaseManager {
    pool: DatabasePool,
}

impl DatabaseManager {
    pub async fn connect(config: &DatabaseConfig) -> SchedulerResult<Self> {
        if config.is_in_memory() {
            info!("使用进程内作业存储");
            return Ok(Self::in_memory());
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!("数据库连接池已建立 (max_connections={})", config.max_connections);
        Ok(Self {
            pool: DatabasePool::PostgreSQL(pool),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            pool: DatabasePool::InMemory(Arc::new(InMemoryJobStore::new())),
        }
    }

    pub fn from_pg_pool(pool: PgPool) -> Self {
        Self {
            pool: DatabasePool::PostgreSQL(pool),
        }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// 执行内置迁移，内存存储无需迁移
    pub async fn run_migrations(&self) -> SchedulerResult<()> {
        if let DatabasePool::PostgreSQL(pool) = &self.pool {
            sqlx::migrate!("../../migrations")
                .run(pool)
                .await
                .map_err(|e| SchedulerError::DatabaseOperation(format!("数据库迁移失败: {e}")))?;
            info!("数据库迁移完成");
        }
        Ok(())
    }

    pub fn job_store(&self) -> Arc<dyn JobStore> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => Arc::new(PostgresJobStore::new(pool.clone())),
            DatabasePool::InMemory(store) => store.clone(),
        }
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        if let DatabasePool::PostgreSQL(pool) = &self.pool {
            sqlx::query("SELECT 1").execute(pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        if let DatabasePool::PostgreSQL(pool) = &self.pool {
            pool.close().await;
            info!("数据库连接池已关闭");
        }
    }
}
