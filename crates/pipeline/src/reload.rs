//! 규칙 리로드 컨트롤러
//!
//! [`ReloadHandle::request`]로 들어온 요청마다 규칙 파일을 다시 읽어
//! [`RuleManager::update_rules`]를 호출합니다.
//! 파일이 잘못되었거나 교체가 실패하면 로그만 남기고 이전 규칙을 유지합니다.
//!
//! 요청 채널 용량은 1입니다. 처리 중에 들어온 요청이 여러 개여도 한 번만 더 리로드합니다.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StreamPipelineError;
use crate::ingestor::RuleManager;
use crate::rule::{RuleLoader, RuleUpdateSummary};
use crate::source::StreamSource;

/// 리로드 요청 핸들
#[derive(Debug, Clone)]
pub struct ReloadHandle {
    tx: mpsc::Sender<()>,
}

impl ReloadHandle {
    /// 리로드를 요청합니다. 이미 대기 중인 요청이 있으면 합쳐집니다.
    ///
    /// 컨트롤러가 종료되었으면 `false`를 반환합니다.
    pub fn request(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }
}

/// 리로드 요청 채널을 만듭니다.
pub fn reload_channel() -> (ReloadHandle, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (ReloadHandle { tx }, rx)
}

/// 리로드 컨트롤러
pub struct ReloadController<S: StreamSource> {
    rules_file: PathBuf,
    rules: RuleManager<S>,
    rx: Option<mpsc::Receiver<()>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<S: StreamSource> ReloadController<S> {
    /// 새 컨트롤러를 생성합니다.
    pub fn new(rules_file: PathBuf, rules: RuleManager<S>, rx: mpsc::Receiver<()>) -> Self {
        Self {
            rules_file,
            rules,
            rx: Some(rx),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// 규칙 파일을 다시 읽어 교체합니다.
    ///
    /// # Errors
    /// 파일을 읽거나 파싱할 수 없는 경우, 또는 소스가 교체를 거부한 경우
    pub async fn reload_once(
        rules_file: &Path,
        rules: &RuleManager<S>,
    ) -> Result<RuleUpdateSummary, StreamPipelineError> {
        let set = RuleLoader::load_file(rules_file).await?;
        rules.update_rules(set).await
    }

    /// 요청 처리 태스크를 시작합니다.
    pub fn start(&mut self) -> Result<(), StreamPipelineError> {
        let Some(mut rx) = self.rx.take() else {
            return Err(StreamPipelineError::AlreadyRunning("reload controller"));
        };

        let rules_file = self.rules_file.clone();
        let rules = self.rules.clone();
        let cancel = self.cancel.clone();

        self.task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    request = rx.recv() => {
                        if request.is_none() {
                            break;
                        }
                        info!(path = %rules_file.display(), "reloading stream rules");
                        match Self::reload_once(&rules_file, &rules).await {
                            Ok(summary) => info!(
                                deleted = summary.deleted,
                                created = summary.created,
                                not_created = summary.not_created,
                                "stream rules reloaded"
                            ),
                            Err(e) => warn!(
                                path = %rules_file.display(),
                                error = %e,
                                "rule reload failed, keeping previous rules"
                            ),
                        }
                    }
                }
            }
            debug!("reload controller stopped");
        }));
        Ok(())
    }

    /// 태스크를 멈춥니다. 진행 중인 리로드는 끝까지 수행됩니다. 멱등입니다.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.task.take()
            && let Err(e) = handle.await
        {
            warn!(error = %e, "reload controller panicked");
        }
    }

    /// 실행 중인지 확인합니다.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}
