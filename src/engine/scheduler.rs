// ==========================================
// 数据迁移导入引擎 - 作业调度
// ==========================================
// 职责: 单作业执行锁（串行化 execute / cancel / rollback 的状态迁移）
//       组织级并发配额（Semaphore，满额时直接拒绝）
// 约束: 注册表由编排器持有，不使用全局变量
//       作业锁只保存弱引用，无人持有时下次登记即清理
// ==========================================

use crate::engine::error::{MigrationError, MigrationResult};
use crate::engine::executor::ExecutionSummary;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::warn;

// ==========================================
// JobScheduler
// ==========================================
pub struct JobScheduler {
    quota: usize,
    job_locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
    org_slots: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl JobScheduler {
    pub fn new(quota: usize) -> Self {
        Self {
            quota: quota.max(1),
            job_locks: Mutex::new(HashMap::new()),
            org_slots: Mutex::new(HashMap::new()),
        }
    }

    /// 作业执行锁（同一 job_id 共享同一把锁）
    pub fn job_lock(&self, job_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.job_locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lock) = locks.get(job_id).and_then(Weak::upgrade) {
            return lock;
        }
        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(job_id.to_string(), Arc::downgrade(&lock));
        lock
    }

    /// 注册表中仍登记的作业锁数量
    pub fn tracked_job_locks(&self) -> usize {
        self.job_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn org_semaphore(&self, organization_id: &str) -> Arc<Semaphore> {
        let mut slots = self.org_slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(organization_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.quota)))
            .clone()
    }

    /// 申请组织执行名额；已满时立即返回配额错误
    pub fn try_admit(&self, organization_id: &str) -> MigrationResult<OwnedSemaphorePermit> {
        self.org_semaphore(organization_id)
            .try_acquire_owned()
            .map_err(|_| {
                warn!(organization_id, quota = self.quota, "组织并发配额已满");
                MigrationError::ConcurrencyQuotaExceeded {
                    organization_id: organization_id.to_string(),
                    quota: self.quota,
                }
            })
    }

    /// 组织当前执行中的作业数
    pub fn running_count(&self, organization_id: &str) -> usize {
        self.quota - self.org_semaphore(organization_id).available_permits()
    }

    pub fn quota(&self) -> usize {
        self.quota
    }
}

// ==========================================
// ExecutionHandle - 后台执行句柄
// ==========================================
#[derive(Debug)]
pub struct ExecutionHandle {
    job_id: String,
    handle: JoinHandle<MigrationResult<ExecutionSummary>>,
}

impl ExecutionHandle {
    pub fn new(job_id: String, handle: JoinHandle<MigrationResult<ExecutionSummary>>) -> Self {
        Self { job_id, handle }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// 等待执行结束（完成信号）
    pub async fn wait(self) -> MigrationResult<ExecutionSummary> {
        self.handle
            .await
            .map_err(|e| MigrationError::FatalExecution(format!("后台任务异常: {}", e)))?
    }

    /// 并发等待多个作业
    pub async fn wait_all(handles: Vec<ExecutionHandle>) -> Vec<MigrationResult<ExecutionSummary>> {
        join_all(handles.into_iter().map(|h| h.wait())).await
    }
}
