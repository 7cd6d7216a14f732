//! Bounded pool of browser pages over a single lazily-launched process.
//!
//! The pool owns at most one browser process at a time and hands out up to
//! `max_size` pages from it. The process is launched on first demand, shared
//! by all concurrent acquirers, torn down after a configurable idle period
//! and relaunched transparently after a crash or disconnect.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{MIN_IDLE_CHECK_INTERVAL, PoolConfig};
use crate::driver::{BrowserDriver, BrowserHandle, PageSession};
use crate::error::{EngineError, Result};

/// Outcome of a browser launch, broadcast to every acquirer awaiting it.
/// `None` means the launch is still in flight.
type LaunchOutcome = Option<std::result::Result<u64, String>>;

/// Why a queued acquirer was woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WakeReason {
    /// A capacity slot opened up; the waiter goes first.
    SlotFreed,
    /// The shared launch failed; retry from scratch.
    LaunchFailed,
    /// The pool is shutting down.
    Closing,
}

enum BrowserSlot {
    Absent,
    Launching(watch::Receiver<LaunchOutcome>),
    Ready {
        handle: Arc<dyn BrowserHandle>,
        epoch: u64,
    },
}

struct PooledPage {
    id: u64,
    page: Arc<dyn PageSession>,
}

struct PoolState {
    browser: BrowserSlot,
    /// Bumped on every successful launch; stale disconnect events compare
    /// against it.
    epoch: u64,
    idle: VecDeque<PooledPage>,
    in_use: HashMap<u64, Arc<dyn PageSession>>,
    /// Pages reserved against capacity but not yet open.
    opening: usize,
    waiters: VecDeque<oneshot::Sender<WakeReason>>,
    next_page_id: u64,
    last_activity: Instant,
    closed: bool,
}

impl PoolState {
    fn size(&self) -> usize {
        self.in_use.len() + self.idle.len() + self.opening
    }

    fn browser_live(&self) -> bool {
        matches!(&self.browser, BrowserSlot::Ready { handle, .. } if handle.is_connected())
    }
}

/// A page checked out of the pool. Owned exclusively by the caller until
/// handed back through [`PagePool::release`].
pub struct PageHandle {
    id: u64,
    page: Arc<dyn PageSession>,
}

impl PageHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn page(&self) -> &dyn PageSession {
        self.page.as_ref()
    }
}

/// Point-in-time pool counters, for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub in_use: usize,
    pub idle: usize,
    pub waiting: usize,
    pub max_size: usize,
    pub browser_alive: bool,
}

enum Step {
    Wait(oneshot::Receiver<WakeReason>),
    AwaitLaunch(watch::Receiver<LaunchOutcome>),
    Launch(watch::Sender<LaunchOutcome>),
    CreatePage {
        id: u64,
        handle: Arc<dyn BrowserHandle>,
    },
}

pub struct PagePool {
    driver: Arc<dyn BrowserDriver>,
    config: PoolConfig,
    state: Arc<Mutex<PoolState>>,
}

impl PagePool {
    pub fn new(driver: Arc<dyn BrowserDriver>, mut config: PoolConfig) -> Arc<Self> {
        if config.idle_check_interval < MIN_IDLE_CHECK_INTERVAL {
            config.idle_check_interval = MIN_IDLE_CHECK_INTERVAL;
        }
        let pool = Arc::new(Self {
            driver,
            state: Arc::new(Mutex::new(PoolState {
                browser: BrowserSlot::Absent,
                epoch: 0,
                idle: VecDeque::new(),
                in_use: HashMap::new(),
                opening: 0,
                waiters: VecDeque::new(),
                next_page_id: 1,
                last_activity: Instant::now(),
                closed: false,
            })),
            config,
        });
        if !pool.config.idle_timeout.is_zero() {
            spawn_idle_sweep(
                Arc::downgrade(&pool.state),
                pool.config.idle_timeout,
                pool.config.idle_check_interval,
            );
        }
        pool
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Check out a page, launching the browser or waiting for capacity as
    /// needed. Waiters are served in arrival order.
    pub async fn acquire(&self) -> Result<PageHandle> {
        let mut woken = false;
        loop {
            let step = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(EngineError::PoolClosed);
                }
                state.last_activity = Instant::now();

                // Newcomers queue behind existing waiters; a woken waiter
                // keeps its turn.
                if !woken && !state.waiters.is_empty() {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    Step::Wait(rx)
                } else if let Some(entry) = pop_live_page(&mut state) {
                    state.in_use.insert(entry.id, entry.page.clone());
                    return Ok(PageHandle {
                        id: entry.id,
                        page: entry.page,
                    });
                } else if state.size() < self.config.max_size {
                    match &state.browser {
                        BrowserSlot::Ready { handle, .. } if handle.is_connected() => {
                            let handle = handle.clone();
                            let id = state.next_page_id;
                            state.next_page_id += 1;
                            state.opening += 1;
                            Step::CreatePage { id, handle }
                        }
                        BrowserSlot::Launching(rx) => {
                            let rx = rx.clone();
                            // A launch abandoned mid-flight leaves a dead
                            // channel behind; start over in that case.
                            if rx.has_changed().is_err() && rx.borrow().is_none() {
                                let (tx, fresh) = watch::channel(None);
                                state.browser = BrowserSlot::Launching(fresh);
                                Step::Launch(tx)
                            } else {
                                Step::AwaitLaunch(rx)
                            }
                        }
                        _ => {
                            let (tx, rx) = watch::channel(None);
                            state.browser = BrowserSlot::Launching(rx);
                            Step::Launch(tx)
                        }
                    }
                } else {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    Step::Wait(rx)
                }
            };

            match step {
                Step::Wait(rx) => match rx.await {
                    Ok(WakeReason::SlotFreed) => woken = true,
                    Ok(WakeReason::LaunchFailed) => woken = false,
                    Ok(WakeReason::Closing) | Err(_) => return Err(EngineError::PoolClosed),
                },
                Step::AwaitLaunch(mut rx) => {
                    let outcome = rx
                        .wait_for(|v| v.is_some())
                        .await
                        .map(|guard| (*guard).clone());
                    match outcome {
                        Ok(Some(Err(msg))) => return Err(EngineError::Launch(msg)),
                        // Launch succeeded, or the launcher vanished; retry
                        // either way.
                        _ => {}
                    }
                }
                Step::Launch(tx) => self.launch_browser(tx).await?,
                Step::CreatePage { id, handle } => return self.create_page(id, handle).await,
            }
        }
    }

    /// Hand a page back. Reusable pages return to the idle set, broken ones
    /// are discarded; either way exactly one waiter is woken. Handles the
    /// pool does not recognize are logged and dropped.
    pub async fn release(&self, handle: PageHandle) {
        let PageHandle { id, page } = handle;
        {
            let mut state = self.state.lock().await;
            state.last_activity = Instant::now();
            // Ids are per-pool serials, so a handle from another pool can
            // collide with a local id. Only the exact page we checked out
            // counts as ours.
            match state.in_use.get(&id) {
                Some(owned) if Arc::ptr_eq(owned, &page) => {
                    state.in_use.remove(&id);
                }
                _ => {
                    warn!(page_id = id, "ignoring release of unknown page handle");
                    return;
                }
            }
        }

        let reusable = if page.is_open() {
            match page.reset(self.config.reset_timeout).await {
                Ok(()) => true,
                Err(err) => {
                    debug!(page_id = id, error = %err, "page reset failed, discarding");
                    false
                }
            }
        } else {
            false
        };

        let pooled = {
            let mut state = self.state.lock().await;
            let pooled = reusable && !state.closed && state.browser_live();
            if pooled {
                state.idle.push_back(PooledPage {
                    id,
                    page: page.clone(),
                });
            }
            wake_one(&mut state);
            pooled
        };
        if !pooled {
            let _ = page.close().await;
        }
    }

    /// Shut the pool down for good: wake all waiters with an error, close
    /// every tracked page and terminate the browser. Safe to call more than
    /// once.
    pub async fn shutdown(&self) {
        let (waiters, pages, browser) = {
            let mut state = self.state.lock().await;
            state.closed = true;
            let waiters: Vec<_> = state.waiters.drain(..).collect();
            let mut pages: Vec<Arc<dyn PageSession>> =
                state.idle.drain(..).map(|p| p.page).collect();
            pages.extend(state.in_use.drain().map(|(_, page)| page));
            let browser = match std::mem::replace(&mut state.browser, BrowserSlot::Absent) {
                BrowserSlot::Ready { handle, .. } => Some(handle),
                _ => None,
            };
            (waiters, pages, browser)
        };
        for waiter in waiters {
            let _ = waiter.send(WakeReason::Closing);
        }
        for page in pages {
            let _ = page.close().await;
        }
        if let Some(browser) = browser {
            let _ = browser.close().await;
        }
        info!("page pool shut down");
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        PoolStats {
            in_use: state.in_use.len() + state.opening,
            idle: state.idle.len(),
            waiting: state.waiters.len(),
            max_size: self.config.max_size,
            browser_alive: state.browser_live(),
        }
    }

    async fn launch_browser(&self, tx: watch::Sender<LaunchOutcome>) -> Result<()> {
        info!("launching browser process");
        match self.driver.launch().await {
            Ok(handle) => {
                let handle: Arc<dyn BrowserHandle> = Arc::from(handle);
                let epoch = {
                    let mut state = self.state.lock().await;
                    state.epoch += 1;
                    state.browser = BrowserSlot::Ready {
                        handle: handle.clone(),
                        epoch: state.epoch,
                    };
                    state.epoch
                };
                self.spawn_disconnect_watcher(handle, epoch);
                let _ = tx.send(Some(Ok(epoch)));
                info!(epoch, "browser process ready");
                Ok(())
            }
            Err(err) => {
                let msg = err.to_string();
                let waiters = {
                    let mut state = self.state.lock().await;
                    state.browser = BrowserSlot::Absent;
                    state.waiters.drain(..).collect::<Vec<_>>()
                };
                let _ = tx.send(Some(Err(msg.clone())));
                // Queued acquirers get to retry instead of hanging on a
                // browser that never came up.
                for waiter in waiters {
                    let _ = waiter.send(WakeReason::LaunchFailed);
                }
                warn!(error = %msg, "browser launch failed");
                Err(EngineError::Launch(msg))
            }
        }
    }

    async fn create_page(&self, id: u64, handle: Arc<dyn BrowserHandle>) -> Result<PageHandle> {
        match handle.new_page().await {
            Ok(page) => {
                let page: Arc<dyn PageSession> = Arc::from(page);
                let mut state = self.state.lock().await;
                state.opening -= 1;
                if state.closed {
                    drop(state);
                    let _ = page.close().await;
                    return Err(EngineError::PoolClosed);
                }
                state.in_use.insert(id, page.clone());
                debug!(page_id = id, "opened new page");
                Ok(PageHandle { id, page })
            }
            Err(err) => {
                let mut state = self.state.lock().await;
                state.opening -= 1;
                // The reserved slot never materialized; pass the turn on.
                wake_one(&mut state);
                Err(EngineError::Driver(err))
            }
        }
    }

    fn spawn_disconnect_watcher(&self, handle: Arc<dyn BrowserHandle>, epoch: u64) {
        let state = Arc::downgrade(&self.state);
        tokio::spawn(async move {
            handle.wait_disconnected().await;
            let Some(state) = state.upgrade() else { return };
            let mut state = state.lock().await;
            match &state.browser {
                BrowserSlot::Ready { epoch: current, .. } if *current == epoch => {
                    warn!(epoch, "browser process disconnected");
                    // Pages bound to the dead process are discarded lazily
                    // on their next acquire or release.
                    state.browser = BrowserSlot::Absent;
                }
                // A later launch already replaced this process.
                _ => {}
            }
        });
    }
}

/// Wake the next waiter whose receiver is still alive.
fn wake_one(state: &mut PoolState) {
    while let Some(waiter) = state.waiters.pop_front() {
        if waiter.send(WakeReason::SlotFreed).is_ok() {
            break;
        }
    }
}

/// Pop the first idle page that is still usable, discarding dead ones.
fn pop_live_page(state: &mut PoolState) -> Option<PooledPage> {
    let live = state.browser_live();
    while let Some(entry) = state.idle.pop_front() {
        if live && entry.page.is_open() {
            return Some(entry);
        }
        debug!(page_id = entry.id, "dropping stale pooled page");
        let page = entry.page;
        tokio::spawn(async move {
            let _ = page.close().await;
        });
    }
    None
}

/// Background sweep that tears the browser down after a quiet period.
fn spawn_idle_sweep(
    state: std::sync::Weak<Mutex<PoolState>>,
    idle_timeout: Duration,
    check_interval: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(state) = state.upgrade() else { break };
            let (pages, browser) = {
                let mut state = state.lock().await;
                if state.closed {
                    break;
                }
                let busy = !state.in_use.is_empty() || state.opening > 0;
                if busy
                    || !matches!(state.browser, BrowserSlot::Ready { .. })
                    || state.last_activity.elapsed() < idle_timeout
                {
                    continue;
                }
                info!("reclaiming idle browser process");
                let pages: Vec<_> = state.idle.drain(..).map(|p| p.page).collect();
                let browser = match std::mem::replace(&mut state.browser, BrowserSlot::Absent) {
                    BrowserSlot::Ready { handle, .. } => Some(handle),
                    _ => None,
                };
                (pages, browser)
            };
            for page in pages {
                let _ = page.close().await;
            }
            if let Some(browser) = browser {
                let _ = browser.close().await;
            }
        }
    });
}
