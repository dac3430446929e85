// 该文件是 Kapian （卡片检测） 项目的一部分。
// src/pipeline/guard.rs - 取消、超时与过期结果保护
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  panic::{self, AssertUnwindSafe},
  sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
    mpsc::{self, RecvTimeoutError},
  },
  thread,
  time::Duration,
};

use tracing::{debug, warn};

/// 可在线程间共享的取消标记
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
  cancelled: Arc<AtomicBool>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallError {
  Elapsed(Duration),
  Panicked,
}

/// 在工作线程中执行外部调用，超过时限即放弃等待
///
/// 超时后工作线程继续运行直到自行结束，其结果被丢弃。
pub(crate) fn run_with_timeout<T, F>(timeout: Option<Duration>, task: F) -> Result<T, CallError>
where
  F: FnOnce() -> T + Send + 'static,
  T: Send + 'static,
{
  // 不限时也要拦住 panic，与工作线程的行为保持一致
  let Some(limit) = timeout else {
    return panic::catch_unwind(AssertUnwindSafe(task)).map_err(|_| {
      warn!("外部调用异常退出");
      CallError::Panicked
    });
  };

  let (tx, rx) = mpsc::channel();
  thread::spawn(move || {
    let _ = tx.send(task());
  });

  match rx.recv_timeout(limit) {
    Ok(value) => Ok(value),
    Err(RecvTimeoutError::Timeout) => {
      warn!("外部调用超时: {:?}", limit);
      Err(CallError::Elapsed(limit))
    }
    Err(RecvTimeoutError::Disconnected) => Err(CallError::Panicked),
  }
}

/// 一次处理任务的凭据
#[derive(Debug, Clone)]
pub struct RunTicket {
  id: u64,
  cancel: CancelToken,
}

impl RunTicket {
  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn cancel_token(&self) -> &CancelToken {
    &self.cancel
  }
}

struct SequencerState<T> {
  latest: u64,
  cancel: Option<CancelToken>,
  committed: Option<(u64, T)>,
}

/// 保证旧任务的结果不会覆盖新任务
///
/// 每次 `begin` 都会取消上一个任务；只有最新凭据可以 `commit`。
pub struct RunSequencer<T> {
  state: Mutex<SequencerState<T>>,
}

impl<T> Default for RunSequencer<T> {
  fn default() -> Self {
    Self {
      state: Mutex::new(SequencerState {
        latest: 0,
        cancel: None,
        committed: None,
      }),
    }
  }
}

impl<T> RunSequencer<T> {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, SequencerState<T>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn begin(&self) -> RunTicket {
    let mut state = self.lock();
    if let Some(previous) = state.cancel.take() {
      debug!("取消第 {} 次任务", state.latest);
      previous.cancel();
    }
    state.latest += 1;
    let cancel = CancelToken::new();
    state.cancel = Some(cancel.clone());
    RunTicket {
      id: state.latest,
      cancel,
    }
  }

  pub fn is_current(&self, ticket: &RunTicket) -> bool {
    self.lock().latest == ticket.id
  }

  /// 提交结果，凭据已过期时丢弃并返回 false
  pub fn commit(&self, ticket: &RunTicket, value: T) -> bool {
    let mut state = self.lock();
    if state.latest != ticket.id {
      debug!("丢弃过期结果: 任务 {}, 最新 {}", ticket.id, state.latest);
      return false;
    }
    state.committed = Some((ticket.id, value));
    true
  }

  pub fn take(&self) -> Option<T> {
    self.lock().committed.take().map(|(_, value)| value)
  }
}
