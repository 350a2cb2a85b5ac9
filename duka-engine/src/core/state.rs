use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::AuthSession;
use crate::core::Config;
use crate::remote::RemoteStore;

/// 引擎状态 - 持有所有能力的单例引用
///
/// EngineState 是同步引擎的核心数据结构，持有远程存储和会话能力的
/// 共享引用。使用 Arc 实现浅拷贝，所有权成本极低。
///
/// The remote store and auth session are injected once at construction
/// and never re-created; services receive a clone of this state instead
/// of reaching for any module-level singleton.
///
/// # 组件
///
/// | 字段 | 类型 | 说明 |
/// |------|------|------|
/// | config | Config | 配置项 (不可变) |
/// | store | Arc<dyn RemoteStore> | 远程存储能力 |
/// | session | Arc<dyn AuthSession> | 认证会话能力 |
/// | shutdown | CancellationToken | 根取消令牌 |
#[derive(Clone, Debug)]
pub struct EngineState {
    /// 引擎配置
    pub config: Config,
    store: Arc<dyn RemoteStore>,
    session: Arc<dyn AuthSession>,
    /// Root token; every service scope is a child of it
    shutdown: CancellationToken,
}

impl EngineState {
    pub fn new(config: Config, store: Arc<dyn RemoteStore>, session: Arc<dyn AuthSession>) -> Self {
        Self {
            config,
            store,
            session,
            shutdown: CancellationToken::new(),
        }
    }

    /// 获取远程存储能力
    pub fn store(&self) -> Arc<dyn RemoteStore> {
        self.store.clone()
    }

    /// 获取会话能力
    pub fn session(&self) -> Arc<dyn AuthSession> {
        self.session.clone()
    }

    /// Child token for one view/service scope. Cancelling the child
    /// tears down that scope only; cancelling the root tears down all.
    pub fn scope_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Cancel every scope derived from this state.
    pub fn shutdown_all(&self) {
        self.shutdown.cancel();
    }

    /// 启动会话守护任务
    ///
    /// Watches the auth session; when the user signs out, every service
    /// scope derived from this state is cancelled so no feed callback
    /// outlives the session.
    pub fn spawn_session_guard(&self) {
        let mut rx = self.session.watch_session();
        let state = self.clone();
        tokio::spawn(async move {
            loop {
                if rx.changed().await.is_err() {
                    break;
                }
                if rx.borrow_and_update().is_none() {
                    tracing::info!("session ended, shutting down all service scopes");
                    state.shutdown_all();
                    break;
                }
            }
        });
    }
}
