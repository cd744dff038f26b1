//! Minimal HTTP/1.1 server that supports HEAD and Range GET for integration tests.
//!
//! Serves a single static body at any path. One request per connection.
//! Segment GETs (everything except the `bytes=0-1` range probe) are counted,
//! can be throttled, and can be made to drop the connection mid-body.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RangeServerOptions {
    /// If false, HEAD returns 405.
    pub head_allowed: bool,
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// Body bytes written per chunk.
    pub chunk_size: usize,
    /// Pause before each chunk (zero = full speed).
    pub chunk_delay: Duration,
    /// Bytes a failing GET sends before the connection is dropped.
    pub fail_after: usize,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            head_allowed: true,
            support_ranges: true,
            chunk_size: 64 * 1024,
            chunk_delay: Duration::ZERO,
            fail_after: 0,
        }
    }
}

#[derive(Default)]
struct Stats {
    active: AtomicUsize,
    max_active: AtomicUsize,
    segment_gets: AtomicUsize,
    bytes_served: AtomicU64,
    /// Segment GETs still to fail (usize::MAX = all of them).
    fail_remaining: AtomicUsize,
    /// (start, end inclusive) of every ranged segment GET, in arrival order.
    ranges: Mutex<Vec<(u64, u64)>>,
}

pub struct RangeServer {
    base: String,
    stats: Arc<Stats>,
}

impl RangeServer {
    /// Serve `body` on an ephemeral port until the process exits.
    pub fn start(body: Vec<u8>, opts: RangeServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let body = Arc::new(body);
        let stats = Arc::new(Stats::default());
        let accept_stats = Arc::clone(&stats);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let body = Arc::clone(&body);
                let stats = Arc::clone(&accept_stats);
                thread::spawn(move || handle(stream, &body, opts, &stats));
            }
        });
        Self {
            base: format!("http://127.0.0.1:{}", port),
            stats,
        }
    }

    pub fn url(&self, name: &str) -> String {
        format!("{}/{}", self.base, name)
    }

    /// Most segment GETs in flight at once.
    pub fn max_active(&self) -> usize {
        self.stats.max_active.load(Ordering::SeqCst)
    }

    pub fn segment_gets(&self) -> usize {
        self.stats.segment_gets.load(Ordering::SeqCst)
    }

    pub fn bytes_served(&self) -> u64 {
        self.stats.bytes_served.load(Ordering::SeqCst)
    }

    pub fn requested_ranges(&self) -> Vec<(u64, u64)> {
        self.stats.ranges.lock().unwrap().clone()
    }

    /// Make the next `n` segment GETs drop mid-body.
    pub fn set_failing(&self, n: usize) {
        self.stats.fail_remaining.store(n, Ordering::SeqCst);
    }
}

struct ActiveGuard<'a>(&'a Stats);

impl<'a> ActiveGuard<'a> {
    fn enter(stats: &'a Stats) -> Self {
        let now = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_active.fetch_max(now, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn take_failure(stats: &Stats) -> bool {
    stats
        .fail_remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
            0 => None,
            usize::MAX => Some(usize::MAX),
            n => Some(n - 1),
        })
        .is_ok()
}

fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        if buf.len() > 64 * 1024 {
            return None;
        }
    }
    String::from_utf8(buf).ok()
}

fn handle(mut stream: TcpStream, body: &[u8], opts: RangeServerOptions, stats: &Stats) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let request = match read_request(&mut stream) {
        Some(r) => r,
        None => return,
    };
    let (method, range) = parse_request(&request);
    let total = body.len() as u64;
    let accept_ranges = if opts.support_ranges {
        "Accept-Ranges: bytes\r\n"
    } else {
        ""
    };

    if method.eq_ignore_ascii_case("HEAD") {
        let response = if opts.head_allowed {
            format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n",
                total, accept_ranges
            )
        } else {
            "HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string()
        };
        let _ = stream.write_all(response.as_bytes());
        return;
    }
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(
            b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        return;
    }

    let probe = range == Some((0, 1));
    let (status, content_range, slice) = match range.filter(|_| opts.support_ranges) {
        Some((start, end_incl)) => {
            let end_incl = end_incl.min(total.saturating_sub(1));
            if start > end_incl || start >= total {
                let response = format!(
                    "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    total
                );
                let _ = stream.write_all(response.as_bytes());
                return;
            }
            (
                "206 Partial Content",
                format!("Content-Range: bytes {}-{}/{}\r\n", start, end_incl, total),
                &body[start as usize..=end_incl as usize],
            )
        }
        None => ("200 OK", String::new(), body),
    };

    let _guard = if probe {
        None
    } else {
        stats.segment_gets.fetch_add(1, Ordering::SeqCst);
        if let Some(r) = range.filter(|_| opts.support_ranges) {
            stats.ranges.lock().unwrap().push(r);
        }
        Some(ActiveGuard::enter(stats))
    };
    let fail = !probe && take_failure(stats);

    let head = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}{}Connection: close\r\n\r\n",
        status,
        slice.len(),
        content_range,
        accept_ranges
    );
    if stream.write_all(head.as_bytes()).is_err() {
        return;
    }

    let limit = if fail {
        opts.fail_after.min(slice.len())
    } else {
        slice.len()
    };
    for chunk in slice[..limit].chunks(opts.chunk_size.max(1)) {
        if !opts.chunk_delay.is_zero() {
            thread::sleep(opts.chunk_delay);
        }
        if stream.write_all(chunk).is_err() {
            return;
        }
        if !probe {
            stats.bytes_served.fetch_add(chunk.len() as u64, Ordering::SeqCst);
        }
    }
}

/// Returns (method, optional (start, end_inclusive) for Range: bytes=X-Y).
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut method = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                if let Some(spec) = value.trim().strip_prefix("bytes=") {
                    if let Some((a, b)) = spec.split_once('-') {
                        let start = a.trim().parse::<u64>().unwrap_or(0);
                        let end = b.trim();
                        let end_incl = if end.is_empty() {
                            u64::MAX
                        } else {
                            end.parse::<u64>().unwrap_or(0)
                        };
                        range = Some((start, end_incl));
                    }
                }
            }
        }
    }
    (method, range)
}
