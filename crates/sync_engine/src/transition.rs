//! Transition table of the projector state machine.
//!
//! Pure functions from the handled event and the loop context to the next
//! step. The engine executes the step; nothing here touches devices.

use contracts::AcquisitionMode;
use serde::Serialize;

/// Canonical events of the projector loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EngineEvent {
    Terminate,
    PrepareReconfigure,
    BeginBatch,
    RenderNext,
    PresentReady,
    WaitRefresh,
    SyncTriggers,
    ChangeIdentity,
}

impl EngineEvent {
    pub fn name(self) -> &'static str {
        match self {
            EngineEvent::Terminate => "terminate",
            EngineEvent::PrepareReconfigure => "prepare_reconfigure",
            EngineEvent::BeginBatch => "begin_batch",
            EngineEvent::RenderNext => "render_next",
            EngineEvent::PresentReady => "present_ready",
            EngineEvent::WaitRefresh => "wait_refresh",
            EngineEvent::SyncTriggers => "sync_triggers",
            EngineEvent::ChangeIdentity => "change_identity",
        }
    }
}

/// What the loop does once every camera is ready again after a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterCapture {
    Raise(EngineEvent),
    EndBatch,
}

/// Next step chosen by the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing further; the next event comes from the queue or a wait
    Idle,
    Raise(EngineEvent),
    /// Run the trigger pass directly (no separate wait)
    RunTriggers,
    /// Wait for capture completion, then continue
    AwaitCapture(AfterCapture),
    /// Raise an event now and wait for capture completion afterwards
    RaiseThenAwait(EngineEvent, AfterCapture),
    EndBatch,
}

/// Loop state the transitions depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub mode: AcquisitionMode,
    /// Acquiring a batch (false in the render-only preview loop)
    pub in_batch: bool,
    pub cameras_attached: bool,
    /// The frame the handler worked on is the last one of the batch
    pub is_last_frame: bool,
    /// Refresh intervals left before the next present (non-blocking)
    pub intervals_remaining: u32,
    /// A presented frame is still waiting for its triggers
    pub presented_pending: bool,
    /// Fixed pattern captures left after the current one
    pub captures_remaining: u32,
}

impl Context {
    fn render_only(&self) -> bool {
        !self.in_batch || !self.cameras_attached
    }
}

/// Events raised when a batch begins, in order
pub fn on_begin_batch(ctx: &Context) -> Vec<EngineEvent> {
    match ctx.mode {
        AcquisitionMode::Blocking { .. } if ctx.cameras_attached => {
            vec![EngineEvent::RenderNext, EngineEvent::PresentReady]
        }
        _ => vec![EngineEvent::RenderNext],
    }
}

/// After a frame was rendered
pub fn after_render(ctx: &Context) -> Step {
    if ctx.render_only() {
        return Step::Raise(EngineEvent::PresentReady);
    }
    match ctx.mode {
        AcquisitionMode::Fixed => Step::Raise(EngineEvent::PresentReady),
        AcquisitionMode::Blocking {
            concurrent_delay: true,
        } if ctx.presented_pending => Step::Raise(EngineEvent::WaitRefresh),
        AcquisitionMode::Blocking { .. } => Step::Idle,
        AcquisitionMode::NonBlocking if ctx.intervals_remaining > 0 => {
            Step::Raise(EngineEvent::WaitRefresh)
        }
        AcquisitionMode::NonBlocking => Step::Raise(EngineEvent::PresentReady),
    }
}

/// After a frame was presented and the post-present refresh pulse passed.
///
/// For non-blocking mode `intervals_remaining` is the freshly recomputed
/// count.
pub fn after_present(ctx: &Context) -> Step {
    if !ctx.in_batch {
        return Step::Raise(EngineEvent::RenderNext);
    }
    if !ctx.cameras_attached {
        return if ctx.is_last_frame {
            Step::EndBatch
        } else {
            Step::Raise(EngineEvent::RenderNext)
        };
    }
    match ctx.mode {
        AcquisitionMode::Fixed
        | AcquisitionMode::Blocking {
            concurrent_delay: false,
        } => Step::Raise(EngineEvent::WaitRefresh),
        AcquisitionMode::Blocking {
            concurrent_delay: true,
        } => {
            if ctx.is_last_frame {
                Step::Raise(EngineEvent::WaitRefresh)
            } else {
                Step::Raise(EngineEvent::RenderNext)
            }
        }
        AcquisitionMode::NonBlocking => non_blocking_countdown(ctx),
    }
}

/// After a `WaitRefresh` pass.
///
/// Blocking and fixed modes have slept off the delay and trigger right away;
/// non-blocking mode has counted one pulse (`intervals_remaining` already
/// decremented).
pub fn after_wait_refresh(ctx: &Context) -> Step {
    match ctx.mode {
        AcquisitionMode::NonBlocking => non_blocking_countdown(ctx),
        _ => Step::RunTriggers,
    }
}

fn non_blocking_countdown(ctx: &Context) -> Step {
    match (ctx.intervals_remaining, ctx.is_last_frame) {
        (0, true) => Step::EndBatch,
        (0, false) => Step::Raise(EngineEvent::RenderNext),
        _ => Step::Raise(EngineEvent::WaitRefresh),
    }
}

/// After triggers fired in blocking or fixed mode
pub fn after_triggers(ctx: &Context) -> Step {
    match ctx.mode {
        AcquisitionMode::Fixed => {
            if ctx.captures_remaining > 0 {
                Step::AwaitCapture(AfterCapture::Raise(EngineEvent::SyncTriggers))
            } else {
                Step::AwaitCapture(AfterCapture::EndBatch)
            }
        }
        _ if ctx.is_last_frame => Step::AwaitCapture(AfterCapture::EndBatch),
        AcquisitionMode::Blocking {
            concurrent_delay: true,
        } => Step::AwaitCapture(AfterCapture::Raise(EngineEvent::PresentReady)),
        AcquisitionMode::Blocking {
            concurrent_delay: false,
        } => Step::RaiseThenAwait(
            EngineEvent::RenderNext,
            AfterCapture::Raise(EngineEvent::PresentReady),
        ),
        AcquisitionMode::NonBlocking => Step::Idle,
    }
}

/// Whether the trigger pass runs again in the same dispatch after `handled`
pub fn should_also_run_sync_triggers(
    handled: EngineEvent,
    ctx: &Context,
    schedule_pending: bool,
) -> bool {
    matches!(handled, EngineEvent::RenderNext | EngineEvent::WaitRefresh)
        && ctx.in_batch
        && ctx.cameras_attached
        && ctx.mode == AcquisitionMode::NonBlocking
        && schedule_pending
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCKING: AcquisitionMode = AcquisitionMode::Blocking {
        concurrent_delay: false,
    };
    const CONCURRENT: AcquisitionMode = AcquisitionMode::Blocking {
        concurrent_delay: true,
    };

    fn ctx(mode: AcquisitionMode) -> Context {
        Context {
            mode,
            in_batch: true,
            cameras_attached: true,
            is_last_frame: false,
            intervals_remaining: 0,
            presented_pending: false,
            captures_remaining: 0,
        }
    }

    #[test]
    fn test_begin_batch_startup_branch() {
        assert_eq!(
            on_begin_batch(&ctx(BLOCKING)),
            vec![EngineEvent::RenderNext, EngineEvent::PresentReady]
        );
        assert_eq!(
            on_begin_batch(&ctx(AcquisitionMode::NonBlocking)),
            vec![EngineEvent::RenderNext]
        );
        assert_eq!(
            on_begin_batch(&ctx(AcquisitionMode::Fixed)),
            vec![EngineEvent::RenderNext]
        );
    }

    #[test]
    fn test_render_dispatch_matrix() {
        assert_eq!(after_render(&ctx(BLOCKING)), Step::Idle);
        assert_eq!(after_render(&ctx(CONCURRENT)), Step::Idle);
        assert_eq!(
            after_render(&Context {
                presented_pending: true,
                ..ctx(CONCURRENT)
            }),
            Step::Raise(EngineEvent::WaitRefresh)
        );
        assert_eq!(
            after_render(&ctx(AcquisitionMode::Fixed)),
            Step::Raise(EngineEvent::PresentReady)
        );
        assert_eq!(
            after_render(&ctx(AcquisitionMode::NonBlocking)),
            Step::Raise(EngineEvent::PresentReady)
        );
        assert_eq!(
            after_render(&Context {
                intervals_remaining: 2,
                ..ctx(AcquisitionMode::NonBlocking)
            }),
            Step::Raise(EngineEvent::WaitRefresh)
        );
    }

    #[test]
    fn test_render_only_without_cameras() {
        let no_cameras = Context {
            cameras_attached: false,
            ..ctx(BLOCKING)
        };
        assert_eq!(after_render(&no_cameras), Step::Raise(EngineEvent::PresentReady));
        assert_eq!(after_present(&no_cameras), Step::Raise(EngineEvent::RenderNext));
        assert_eq!(
            after_present(&Context {
                is_last_frame: true,
                ..no_cameras
            }),
            Step::EndBatch
        );
    }

    #[test]
    fn test_preview_loops_render_present() {
        let preview = Context {
            in_batch: false,
            ..ctx(BLOCKING)
        };
        assert_eq!(after_render(&preview), Step::Raise(EngineEvent::PresentReady));
        assert_eq!(after_present(&preview), Step::Raise(EngineEvent::RenderNext));
        assert!(!should_also_run_sync_triggers(EngineEvent::RenderNext, &preview, true));
    }

    #[test]
    fn test_present_dispatch_mirrors_render() {
        assert_eq!(after_present(&ctx(BLOCKING)), Step::Raise(EngineEvent::WaitRefresh));
        assert_eq!(after_present(&ctx(CONCURRENT)), Step::Raise(EngineEvent::RenderNext));
        assert_eq!(
            after_present(&Context {
                is_last_frame: true,
                ..ctx(CONCURRENT)
            }),
            Step::Raise(EngineEvent::WaitRefresh)
        );
        assert_eq!(
            after_present(&ctx(AcquisitionMode::Fixed)),
            Step::Raise(EngineEvent::WaitRefresh)
        );
    }

    #[test]
    fn test_non_blocking_countdown() {
        let base = ctx(AcquisitionMode::NonBlocking);
        let three_left = Context {
            intervals_remaining: 3,
            ..base
        };
        assert_eq!(after_present(&three_left), Step::Raise(EngineEvent::WaitRefresh));
        assert_eq!(after_wait_refresh(&three_left), Step::Raise(EngineEvent::WaitRefresh));
        assert_eq!(after_wait_refresh(&base), Step::Raise(EngineEvent::RenderNext));
        assert_eq!(
            after_wait_refresh(&Context {
                is_last_frame: true,
                ..base
            }),
            Step::EndBatch
        );
    }

    #[test]
    fn test_blocking_wait_refresh_runs_triggers() {
        assert_eq!(after_wait_refresh(&ctx(BLOCKING)), Step::RunTriggers);
        assert_eq!(after_wait_refresh(&ctx(AcquisitionMode::Fixed)), Step::RunTriggers);
    }

    #[test]
    fn test_after_triggers() {
        assert_eq!(
            after_triggers(&ctx(BLOCKING)),
            Step::RaiseThenAwait(
                EngineEvent::RenderNext,
                AfterCapture::Raise(EngineEvent::PresentReady)
            )
        );
        assert_eq!(
            after_triggers(&ctx(CONCURRENT)),
            Step::AwaitCapture(AfterCapture::Raise(EngineEvent::PresentReady))
        );
        assert_eq!(
            after_triggers(&Context {
                is_last_frame: true,
                ..ctx(BLOCKING)
            }),
            Step::AwaitCapture(AfterCapture::EndBatch)
        );
        assert_eq!(
            after_triggers(&Context {
                captures_remaining: 2,
                ..ctx(AcquisitionMode::Fixed)
            }),
            Step::AwaitCapture(AfterCapture::Raise(EngineEvent::SyncTriggers))
        );
        assert_eq!(
            after_triggers(&ctx(AcquisitionMode::Fixed)),
            Step::AwaitCapture(AfterCapture::EndBatch)
        );
    }

    #[test]
    fn test_sync_triggers_fallthrough() {
        let nb = ctx(AcquisitionMode::NonBlocking);
        assert!(should_also_run_sync_triggers(EngineEvent::RenderNext, &nb, true));
        assert!(should_also_run_sync_triggers(EngineEvent::WaitRefresh, &nb, true));
        assert!(!should_also_run_sync_triggers(EngineEvent::WaitRefresh, &nb, false));
        assert!(!should_also_run_sync_triggers(EngineEvent::PresentReady, &nb, true));
        assert!(!should_also_run_sync_triggers(EngineEvent::RenderNext, &ctx(BLOCKING), true));
    }
}
