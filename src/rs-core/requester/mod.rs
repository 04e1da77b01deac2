use crate::{
    bindings::{RequestId, TimerId, TimerReason},
    playlist::ByteRange,
    segment_loader::{FetchRequest, Fetcher, Scheduler},
    Logger,
};

pub(crate) const DEFAULT_BACKOFF_BASE: f64 = 300.;
pub(crate) const DEFAULT_BACKOFF_MAX: f64 = 3000.;

/// Kind of resource a request is for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum RequestKind {
    Segment,
    /// Decryption key, with the URI identifying it.
    Key(String),
}

/// The `Requester` keeps track of the requests the segment loader performs:
/// at most one segment request and one key request at a time.
///
/// Failed key requests are retried after an exponential backoff delay, to
/// avoid overloading the server serving them.
pub(crate) struct Requester {
    pending_segment: Option<RequestInfo>,
    pending_key: Option<RequestInfo>,

    /// Failed requests are actually retried after a timer.
    /// Links that timer's `TimerId` to the key request being retried.
    retry_timer: Option<TimerId>,

    /// Number of consecutive failures after which a key request is not
    /// retried anymore.
    key_max_attempts: u32,

    /// Roughly the initial delay, in milliseconds, before retrying a failed key request.
    backoff_base: f64,

    /// Maximum delay, in milliseconds, before retrying a failed key request.
    backoff_max: f64,
}

#[derive(Clone, Debug)]
struct RequestInfo {
    /// `None` while waiting for a retry timer.
    request_id: Option<RequestId>,
    kind: RequestKind,
    request: FetchRequest,
    attempts_failed: u32,
}

/// What happened to a request that failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum FailureOutcome {
    /// The request was not known (aborted or already finished).
    Unknown,
    /// The request timed out. It is not retried.
    TimedOut(RequestKind),
    /// The request will be performed again after a delay.
    Retried(RequestKind),
    /// The request failed for good.
    Failed(RequestKind),
}

impl Requester {
    pub(crate) fn new(key_max_attempts: u32) -> Self {
        Self {
            pending_segment: None,
            pending_key: None,
            retry_timer: None,
            key_max_attempts,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }

    pub(crate) fn update_key_max_attempts(&mut self, attempts: u32) {
        self.key_max_attempts = attempts;
    }

    pub(crate) fn update_backoff(&mut self, base: f64, max: f64) {
        self.backoff_base = base;
        self.backoff_max = max;
    }

    pub(crate) fn request_segment(
        &mut self,
        fetcher: &mut impl Fetcher,
        url: &str,
        range: Option<ByteRange>,
        timeout_ms: Option<f64>,
    ) {
        let request = FetchRequest {
            url: url.to_owned(),
            timeout_ms,
            range,
        };
        let request_id = fetcher.fetch(request.clone());
        Logger::info(&format!("Req: Requesting segment u:{url} id:{request_id}"));
        self.pending_segment = Some(RequestInfo {
            request_id: Some(request_id),
            kind: RequestKind::Segment,
            request,
            attempts_failed: 0,
        });
    }

    pub(crate) fn request_key(
        &mut self,
        fetcher: &mut impl Fetcher,
        uri: &str,
        timeout_ms: Option<f64>,
    ) {
        let request = FetchRequest {
            url: uri.to_owned(),
            timeout_ms,
            range: None,
        };
        let request_id = fetcher.fetch(request.clone());
        Logger::info(&format!("Req: Requesting key u:{uri} id:{request_id}"));
        self.pending_key = Some(RequestInfo {
            request_id: Some(request_id),
            kind: RequestKind::Key(uri.to_owned()),
            request,
            attempts_failed: 0,
        });
    }

    /// Returns `true` if a request, or a retry timer, is still pending.
    pub(crate) fn has_pending(&self) -> bool {
        self.pending_segment.is_some() || self.pending_key.is_some()
    }

    /// To call when the request with the given id succeeded. Returns what it
    /// was for, or `None` if it wasn't known.
    pub(crate) fn on_request_success(&mut self, request_id: RequestId) -> Option<RequestKind> {
        let slot = self.slot_for(request_id)?;
        slot.take().map(|info| {
            Logger::debug(&format!("Req: Request succeeded id:{request_id}"));
            info.kind
        })
    }

    /// To call when the request with the given id failed.
    pub(crate) fn on_request_failure(
        &mut self,
        scheduler: &mut impl Scheduler,
        request_id: RequestId,
        timed_out: bool,
    ) -> FailureOutcome {
        let key_max_attempts = self.key_max_attempts;
        let (backoff_base, backoff_max) = (self.backoff_base, self.backoff_max);
        let slot = match self.slot_for(request_id) {
            Some(slot) => slot,
            None => return FailureOutcome::Unknown,
        };
        let Some(mut info) = slot.take() else {
            return FailureOutcome::Unknown;
        };
        if timed_out {
            Logger::warn(&format!("Req: Request timed out id:{request_id}"));
            return FailureOutcome::TimedOut(info.kind);
        }
        info.attempts_failed += 1;
        match info.kind {
            RequestKind::Key(_) if info.attempts_failed < key_max_attempts => {
                let delay = get_waiting_delay(info.attempts_failed, backoff_base, backoff_max);
                Logger::warn(&format!(
                    "Req: Key request failed id:{request_id}, retrying in {delay}ms"
                ));
                let kind = info.kind.clone();
                info.request_id = None;
                *slot = Some(info);
                self.retry_timer = Some(scheduler.start_timer(delay, TimerReason::RetryRequest));
                FailureOutcome::Retried(kind)
            }
            kind => {
                Logger::warn(&format!("Req: Request failed id:{request_id}"));
                FailureOutcome::Failed(kind)
            }
        }
    }

    /// To call when a `TimerReason::RetryRequest` timer elapsed. Returns
    /// `true` if it was linked to this `Requester`.
    pub(crate) fn on_timer_finished(&mut self, fetcher: &mut impl Fetcher, id: TimerId) -> bool {
        if self.retry_timer != Some(id) {
            return false;
        }
        self.retry_timer = None;
        if let Some(info) = self.pending_key.as_mut() {
            if info.request_id.is_none() {
                let request_id = fetcher.fetch(info.request.clone());
                Logger::info(&format!(
                    "Req: Retrying key request u:{} id:{request_id}",
                    info.request.url
                ));
                info.request_id = Some(request_id);
            }
        }
        true
    }

    /// Abort every pending request and clear the retry timer.
    pub(crate) fn abort_all(&mut self, host: &mut (impl Fetcher + Scheduler)) {
        for info in [self.pending_segment.take(), self.pending_key.take()]
            .into_iter()
            .flatten()
        {
            if let Some(request_id) = info.request_id {
                Logger::info(&format!(
                    "Req: Aborting request u:{} id:{request_id}",
                    info.request.url
                ));
                host.abort(request_id);
            }
        }
        if let Some(timer_id) = self.retry_timer.take() {
            host.clear_timer(timer_id);
        }
    }

    fn slot_for(&mut self, request_id: RequestId) -> Option<&mut Option<RequestInfo>> {
        let matches = |info: &Option<RequestInfo>| {
            info.as_ref().and_then(|i| i.request_id) == Some(request_id)
        };
        if matches(&self.pending_segment) {
            Some(&mut self.pending_segment)
        } else if matches(&self.pending_key) {
            Some(&mut self.pending_key)
        } else {
            None
        }
    }
}

/// Delay, in milliseconds, to wait before retrying a request which failed
/// `retry_attempt` times in a row.
fn get_waiting_delay(retry_attempt: u32, base: f64, max: f64) -> f64 {
    f64::min(
        base * 2u64.saturating_pow(retry_attempt.saturating_sub(1)) as f64,
        max,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment_loader::host::tests::MockHost;

    #[test]
    fn test_waiting_delay() {
        assert_eq!(get_waiting_delay(1, 300., 3000.), 300.);
        assert_eq!(get_waiting_delay(2, 300., 3000.), 600.);
        assert_eq!(get_waiting_delay(100, 300., 3000.), 3000.);
        assert_eq!(get_waiting_delay(u32::MAX, 300., 3000.), 3000.);
        assert_eq!(get_waiting_delay(4, 300., 3000.), 2400.);
        assert_eq!(get_waiting_delay(5, 300., 3000.), 3000.);
        assert_eq!(get_waiting_delay(20, 300., 3000.), 3000.);
    }

    #[test]
    fn test_segment_success() {
        let mut host = MockHost::default();
        let mut requester = Requester::new(2);
        let range = ByteRange {
            offset: 0,
            length: 10,
        };
        requester.request_segment(&mut host, "seg.ts", Some(range), Some(15000.));
        assert!(requester.has_pending());
        let (id, request) = host.requests[0].clone();
        assert_eq!(request.range, Some(range));
        assert_eq!(request.timeout_ms, Some(15000.));

        assert_eq!(requester.on_request_success(id + 1), None);
        assert_eq!(requester.on_request_success(id), Some(RequestKind::Segment));
        assert!(!requester.has_pending());
        assert_eq!(requester.on_request_success(id), None);
    }

    #[test]
    fn test_segment_failure_is_not_retried() {
        let mut host = MockHost::default();
        let mut requester = Requester::new(2);
        requester.request_segment(&mut host, "seg.ts", None, None);
        let id = host.requests[0].0;
        assert_eq!(
            requester.on_request_failure(&mut host, id, false),
            FailureOutcome::Failed(RequestKind::Segment)
        );
        assert!(host.timers.is_empty());
        assert_eq!(
            requester.on_request_failure(&mut host, id, false),
            FailureOutcome::Unknown
        );
    }

    #[test]
    fn test_timeout() {
        let mut host = MockHost::default();
        let mut requester = Requester::new(2);
        requester.request_key(&mut host, "key", None);
        let id = host.requests[0].0;
        assert_eq!(
            requester.on_request_failure(&mut host, id, true),
            FailureOutcome::TimedOut(RequestKind::Key("key".into()))
        );
        assert!(!requester.has_pending());
    }

    #[test]
    fn test_key_retry() {
        let mut host = MockHost::default();
        let mut requester = Requester::new(3);
        requester.request_key(&mut host, "key", None);

        let id = host.requests[0].0;
        assert_eq!(
            requester.on_request_failure(&mut host, id, false),
            FailureOutcome::Retried(RequestKind::Key("key".into()))
        );
        assert!(requester.has_pending());
        let (timer_id, delay) = host.active_timers(TimerReason::RetryRequest)[0];
        assert_eq!(delay, 300.);
        assert!(!requester.on_timer_finished(&mut host, timer_id + 1.));
        assert!(requester.on_timer_finished(&mut host, timer_id));
        assert_eq!(host.requests.len(), 2);

        let id = host.requests[1].0;
        assert_eq!(
            requester.on_request_failure(&mut host, id, false),
            FailureOutcome::Retried(RequestKind::Key("key".into()))
        );
        assert_eq!(host.timers.last().map(|t| t.1), Some(600.));
        let timer_id = host.timers.last().map(|t| t.0).unwrap();
        requester.on_timer_finished(&mut host, timer_id);

        let id = host.requests[2].0;
        assert_eq!(
            requester.on_request_failure(&mut host, id, false),
            FailureOutcome::Failed(RequestKind::Key("key".into()))
        );
        assert!(!requester.has_pending());
    }

    #[test]
    fn test_abort_all() {
        let mut host = MockHost::default();
        let mut requester = Requester::new(2);
        requester.request_key(&mut host, "key", None);
        requester.request_segment(&mut host, "seg.ts", None, None);
        let key_id = host.requests[0].0;
        requester.on_request_failure(&mut host, key_id, false);
        let timer_id = host.timers[0].0;

        requester.abort_all(&mut host);
        assert!(!requester.has_pending());
        assert_eq!(host.aborted, vec![host.requests[1].0]);
        assert_eq!(host.cleared_timers, vec![timer_id]);
        assert!(!requester.on_timer_finished(&mut host, timer_id));
    }
}
