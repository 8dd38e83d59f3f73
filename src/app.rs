use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use smart_queue_core::{config::AppConfig, MessageQueue};
use smart_queue_dispatcher::{
    run_ingestor_loop, run_reconciliation_loop, run_scheduler_loop, DispatcherComponents,
    JobService,
};
use smart_queue_infrastructure::{
    declare_job_topology, mask_amqp_url, DatabaseManager, MessageQueueFactory,
};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 就绪扫描、认领派发与对账
    Dispatcher,
    /// 仅消费执行事件
    Ingestor,
    /// 运行所有组件
    All,
}

impl AppMode {
    fn runs_dispatcher(&self) -> bool {
        matches!(self, AppMode::Dispatcher | AppMode::All)
    }

    fn runs_ingestor(&self) -> bool {
        matches!(self, AppMode::Ingestor | AppMode::All)
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    instance_id: String,
    database: DatabaseManager,
    message_queue: Arc<dyn MessageQueue>,
    components: DispatcherComponents,
    job_service: Arc<JobService>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        let instance_id = resolve_instance_id(&config);
        info!("初始化应用程序，模式: {:?}, 实例: {}", mode, instance_id);

        let database = DatabaseManager::connect(&config.database)
            .await
            .context("连接数据库失败")?;
        database
            .run_migrations()
            .await
            .context("运行数据库迁移失败")?;

        info!("连接消息队列: {}", mask_amqp_url(&config.message_queue.url));
        let message_queue = MessageQueueFactory::create(&config.message_queue)
            .await
            .context("连接消息队列失败")?;
        declare_job_topology(message_queue.as_ref(), &config.message_queue)
            .await
            .context("声明消息队列拓扑失败")?;

        let job_store = database.job_store();
        let components = DispatcherComponents::build(
            job_store.clone(),
            message_queue.clone(),
            &config.dispatcher,
            &config.message_queue,
            &instance_id,
        )
        .context("组装调度组件失败")?;
        let job_service = Arc::new(JobService::new(job_store));

        Ok(Self {
            config,
            mode,
            instance_id,
            database,
            message_queue,
            components,
            job_service,
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// 提交与查询入口，供嵌入方使用
    pub fn job_service(&self) -> Arc<JobService> {
        Arc::clone(&self.job_service)
    }

    /// 运行直到收到关闭信号，随后释放连接
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);
        let mut handles = Vec::new();

        if self.mode.runs_dispatcher() {
            let scheduler = Arc::clone(&self.components.scheduler);
            let interval = self.config.dispatcher.schedule_interval_seconds;
            let rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                run_scheduler_loop(scheduler, interval, rx).await;
            }));

            let reconciliation = Arc::clone(&self.components.reconciliation);
            let interval = self.config.dispatcher.reconcile_interval_seconds;
            let rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                run_reconciliation_loop(reconciliation, interval, rx).await;
            }));
        }

        if self.mode.runs_ingestor() {
            let ingestor = Arc::clone(&self.components.ingestor);
            let message_queue = Arc::clone(&self.message_queue);
            let queue_config = self.config.message_queue.clone();
            let poll_interval =
                Duration::from_millis(self.config.dispatcher.ingest_poll_interval_millis);
            let rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                run_ingestor_loop(ingestor, message_queue, queue_config, poll_interval, rx).await;
            }));
        }
        drop(shutdown_rx);

        for handle in handles {
            if let Err(e) = handle.await {
                error!("后台任务异常退出: {}", e);
            }
        }

        if let Err(e) = self.message_queue.close().await {
            warn!("关闭消息队列失败: {}", e);
        }
        self.database.close().await;

        info!("所有组件已停止");
        Ok(())
    }
}

/// 未配置实例标识时使用 `主机名-进程号`，保证同一主机上的多个实例互不冲突
pub fn resolve_instance_id(config: &AppConfig) -> String {
    if let Some(id) = &config.dispatcher.instance_id {
        return id.clone();
    }
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "smart-queue".to_string());
    format!("{}-{}", host, std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownManager;
    use smart_queue_core::JobStatus;
    use smart_queue_testing_utils::SubmissionBuilder;

    fn in_memory_config() -> AppConfig {
        AppConfig::from_toml(
            r#"
            [database]
            url = "memory://"

            [message_queue]
            type = "in_memory"

            [dispatcher]
            instance_id = "test-instance"
            schedule_interval_seconds = 1
            reconcile_interval_seconds = 1
            ingest_poll_interval_millis = 50
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_configured_instance_id_wins() {
        let config = in_memory_config();
        assert_eq!(resolve_instance_id(&config), "test-instance");

        let generated = resolve_instance_id(&AppConfig::default());
        assert!(generated.ends_with(&format!("-{}", std::process::id())));
    }

    #[tokio::test]
    async fn test_in_memory_application_dispatches_and_stops() {
        let app = Application::new(in_memory_config(), AppMode::All)
            .await
            .unwrap();
        assert_eq!(app.instance_id(), "test-instance");

        let service = app.job_service();
        let job = service
            .submit(SubmissionBuilder::new("embedded").build())
            .await
            .unwrap();

        let shutdown = ShutdownManager::new();
        let rx = shutdown.subscribe().await;
        let app = Arc::new(app);
        let handle = {
            let app = Arc::clone(&app);
            tokio::spawn(async move { app.run(rx).await })
        };

        let mut status = JobStatus::Waiting;
        for _ in 0..50 {
            status = service.get_job(job.job_id).await.unwrap().job.status;
            if status == JobStatus::Queued {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(status, JobStatus::Queued);

        shutdown.shutdown().await;
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("application stops after shutdown")
            .unwrap()
            .unwrap();
    }
}
