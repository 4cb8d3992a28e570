//! Best-effort reverse-name lookups for threat sources.
//!
//! Lookups run on a bounded pool of worker threads. Whatever is still pending when the
//! deadline passes is abandoned, so a slow or unreachable resolver can delay the report by at
//! most one timeout.
use std::collections::HashMap;
use std::net::IpAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::Resolver;
use super::containers::ThreatRecord;
use super::utils::isolate;

/// Outcome of a single reverse lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NameLookup {
    Resolved(String),
    NotFound,
    TimedOut,
    Failed(String),
}

impl NameLookup {
    pub fn into_name(self) -> Option<String> {
        match self {
            NameLookup::Resolved(name) => Some(name),
            _ => None,
        }
    }
}

/// Resolves an address to a host name. Implementations may block.
pub trait NameResolver: Send + Sync {
    fn reverse_lookup(&self, addr: IpAddr) -> NameLookup;
}

/// Resolver that never answers, used when lookups are disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResolver;

impl NameResolver for NoResolver {
    fn reverse_lookup(&self, _addr: IpAddr) -> NameLookup {
        NameLookup::NotFound
    }
}

/// PTR lookups through the system's DNS configuration.
pub struct DnsResolver {
    resolver: Resolver,
}

impl DnsResolver {
    /// Builds a resolver making a single attempt per query, bounded by `timeout`.
    pub fn new(timeout: Duration) -> std::io::Result<Self> {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;

        let resolver = match trust_dns_resolver::system_conf::read_system_conf() {
            Ok((config, _)) => Resolver::new(config, opts)?,
            Err(err) => {
                log::debug!("No system resolver config ({err}), using defaults.");
                Resolver::new(ResolverConfig::default(), opts)?
            }
        };
        Ok(Self { resolver })
    }
}

impl NameResolver for DnsResolver {
    fn reverse_lookup(&self, addr: IpAddr) -> NameLookup {
        match self.resolver.reverse_lookup(addr) {
            Ok(response) => response
                .iter()
                .next()
                .map(|name| NameLookup::Resolved(name.to_string().trim_end_matches('.').to_string()))
                .unwrap_or(NameLookup::NotFound),
            Err(err) => match err.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => NameLookup::NotFound,
                ResolveErrorKind::Timeout => NameLookup::TimedOut,
                _ => NameLookup::Failed(err.to_string()),
            },
        }
    }
}

/// Upper bound on lookups in flight at once.
pub const MAX_LOOKUP_WORKERS: usize = 8;

type LookupJobs = Arc<Mutex<mpsc::Receiver<(String, IpAddr)>>>;

/// Looks up every address on a small pool of workers, waiting no longer than `timeout` overall.
///
/// Addresses that are not IP literals, and lookups still pending at the deadline, come back
/// as unresolved. A lookup that panics only affects its own address.
pub fn lookup_all(resolver: &Arc<dyn NameResolver>, addrs: &[String], timeout: Duration) -> HashMap<String, NameLookup> {
    let deadline = Instant::now() + timeout;
    let mut results = HashMap::new();

    let (job_tx, job_rx) = mpsc::channel();
    let mut queued = Vec::new();
    for addr in addrs {
        match addr.parse::<IpAddr>() {
            Ok(ip) => {
                // Receiver is alive until the workers are spawned
                let _ = job_tx.send((addr.clone(), ip));
                queued.push(addr.clone());
            }
            Err(_) => {
                results.insert(addr.clone(), NameLookup::Failed(format!("not an IP address: {addr}")));
            }
        }
    }
    drop(job_tx);
    if queued.is_empty() {
        return results;
    }

    let jobs: LookupJobs = Arc::new(Mutex::new(job_rx));
    let (result_tx, result_rx) = mpsc::channel();
    let mut workers = 0;
    for id in 0..queued.len().min(MAX_LOOKUP_WORKERS) {
        let jobs = Arc::clone(&jobs);
        let sender = result_tx.clone();
        let resolver = Arc::clone(resolver);
        let spawned = thread::Builder::new()
            .name(format!("rdns-{id}"))
            .spawn(move || lookup_worker(&jobs, &sender, &*resolver, deadline));
        match spawned {
            Ok(_) => workers += 1,
            Err(err) => {
                log::warn!("Could not start lookup worker: {err}");
                break;
            }
        }
    }
    drop(result_tx);

    if workers == 0 {
        for addr in queued {
            results.insert(addr, NameLookup::Failed("no lookup workers".to_string()));
        }
        return results;
    }

    let mut answered = 0;
    while answered < queued.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match result_rx.recv_timeout(remaining) {
            Ok((addr, outcome)) => {
                answered += 1;
                results.insert(addr, outcome);
            }
            Err(_) => break,
        }
    }

    for addr in queued {
        let outcome = results.entry(addr.clone()).or_insert(NameLookup::TimedOut);
        if !matches!(outcome, NameLookup::Resolved(_)) {
            log::debug!("Reverse lookup for {addr} gave no name: {outcome:?}");
        }
    }
    results
}

/// Drains the shared queue until it is empty or the deadline has passed.
fn lookup_worker(
    jobs: &Mutex<mpsc::Receiver<(String, IpAddr)>>,
    results: &mpsc::Sender<(String, NameLookup)>,
    resolver: &dyn NameResolver,
    deadline: Instant,
) {
    while Instant::now() < deadline {
        let job = match jobs.lock() {
            Ok(queue) => queue.try_recv(),
            Err(_) => return,
        };
        let Ok((addr, ip)) = job else {
            return;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| resolver.reverse_lookup(ip)))
            .unwrap_or_else(|_| NameLookup::Failed("lookup panicked".to_string()));
        // Collector may have given up already
        if results.send((addr, outcome)).is_err() {
            return;
        }
    }
}

/// Resolves the distinct threat sources, keeping only the names that came back.
fn resolve_sources(threats: &[ThreatRecord], resolver: &Arc<dyn NameResolver>, timeout: Duration) -> HashMap<String, String> {
    let mut sources: Vec<String> = threats.iter().filter_map(|t| t.source.clone()).collect();
    sources.sort();
    sources.dedup();
    if sources.is_empty() {
        return HashMap::new();
    }

    log::info!("Resolving {} threat source(s).", sources.len());
    lookup_all(resolver, &sources, timeout)
        .into_iter()
        .filter_map(|(addr, lookup)| lookup.into_name().map(|name| (addr, name)))
        .collect()
}

/// Fills `source_hostname` on every threat whose source resolves.
///
/// Runs isolated: if resolution fails outright the threats are left as they were.
pub fn enrich_threats(threats: &mut [ThreatRecord], resolver: &Arc<dyn NameResolver>, timeout: Duration) {
    let names = isolate("enrichment", || resolve_sources(threats, resolver, timeout));

    for threat in threats.iter_mut() {
        threat.source_hostname = threat.source.as_ref().and_then(|src| names.get(src)).cloned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyser::containers::{Severity, Threat};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedResolver;

    impl NameResolver for FixedResolver {
        fn reverse_lookup(&self, addr: IpAddr) -> NameLookup {
            match addr.to_string().as_str() {
                "10.0.0.1" => NameLookup::Resolved("host-a.lan".to_string()),
                "10.0.0.2" => {
                    thread::sleep(Duration::from_secs(5));
                    NameLookup::Resolved("too-late.lan".to_string())
                }
                "10.0.0.3" => panic!("resolver blew up"),
                _ => NameLookup::NotFound,
            }
        }
    }

    fn threat(source: &str) -> ThreatRecord {
        ThreatRecord::new(Threat::SynFlood { packet_count: 40 }, Severity::Critical, String::new())
            .with_source(Some(source))
    }

    #[test]
    fn failures_degrade_to_absent() {
        let resolver: Arc<dyn NameResolver> = Arc::new(FixedResolver);
        let mut threats = vec![
            threat("10.0.0.1"),
            threat("10.0.0.2"),
            threat("10.0.0.3"),
            threat("10.0.0.4"),
            threat("not-an-ip"),
        ];

        let started = Instant::now();
        enrich_threats(&mut threats, &resolver, Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_secs(2));

        let names: Vec<Option<&str>> = threats.iter().map(|t| t.source_hostname.as_deref()).collect();
        assert_eq!(names, vec![Some("host-a.lan"), None, None, None, None]);
    }

    #[test]
    fn lookup_outcomes_are_explicit() {
        let resolver: Arc<dyn NameResolver> = Arc::new(FixedResolver);
        let addrs = vec!["10.0.0.2".to_string(), "10.0.0.4".to_string()];
        let outcomes = lookup_all(&resolver, &addrs, Duration::from_millis(100));

        assert_eq!(outcomes["10.0.0.2"], NameLookup::TimedOut);
        assert_eq!(outcomes["10.0.0.4"], NameLookup::NotFound);
    }

    #[test]
    fn no_resolver_never_names() {
        let resolver: Arc<dyn NameResolver> = Arc::new(NoResolver);
        let mut threats = vec![threat("10.0.0.1")];
        enrich_threats(&mut threats, &resolver, Duration::from_millis(50));
        assert_eq!(threats[0].source_hostname, None);
    }

    #[derive(Default)]
    struct CountingResolver {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl NameResolver for CountingResolver {
        fn reverse_lookup(&self, _addr: IpAddr) -> NameLookup {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
            self.active.fetch_sub(1, Ordering::SeqCst);
            NameLookup::Resolved("busy.lan".to_string())
        }
    }

    #[test]
    fn lookups_share_a_bounded_pool() {
        let counting = Arc::new(CountingResolver::default());
        let resolver: Arc<dyn NameResolver> = counting.clone();
        let addrs: Vec<String> = (1..=40).map(|i| format!("10.1.0.{i}")).collect();

        let outcomes = lookup_all(&resolver, &addrs, Duration::from_secs(5));

        assert_eq!(outcomes.len(), 40);
        assert!(outcomes.values().all(|o| *o == NameLookup::Resolved("busy.lan".to_string())));
        let peak = counting.peak.load(Ordering::SeqCst);
        assert!((1..=MAX_LOOKUP_WORKERS).contains(&peak), "peak {peak}");
    }

    struct PanickingResolver;

    impl NameResolver for PanickingResolver {
        fn reverse_lookup(&self, _addr: IpAddr) -> NameLookup {
            panic!("resolver unavailable")
        }
    }

    #[test]
    fn panicking_resolver_leaves_threats_intact() {
        let resolver: Arc<dyn NameResolver> = Arc::new(PanickingResolver);
        let mut threats: Vec<ThreatRecord> = (1..=20).map(|i| threat(&format!("10.2.0.{i}"))).collect();

        enrich_threats(&mut threats, &resolver, Duration::from_millis(200));

        assert_eq!(threats.len(), 20);
        assert!(threats.iter().all(|t| t.source_hostname.is_none()));
        assert_eq!(threats[0].source.as_deref(), Some("10.2.0.1"));
    }
}
