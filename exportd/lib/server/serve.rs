use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    poll::{poll, PollFd, PollFlags, PollTimeout},
};
use tracing::{debug, warn};

use crate::{
    config::{EXPORT_CACHE, FH_CACHE, RETRY_INTERVAL_SECS, WAIT_CAP_SECS},
    resolve::Resolver,
    CacheResult,
};

use super::{ExportHandler, FhHandler, HandleOutcome, UpcallChannel, UpcallHandler};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The event loop over every open cache channel.
///
/// Single-threaded and blocking: one `poll` wakeup services the readable
/// channels and at most one delayed retry, then computes the next wait from
/// the retry queue.
pub struct CacheServer {
    channels: Vec<(UpcallChannel, Box<dyn UpcallHandler>)>,
    delayed: VecDeque<DelayedRequest>,
    retry_interval: Duration,
}

/// One request held back because its answer was indeterminate.
struct DelayedRequest {
    line: String,
    channel: usize,
    last_attempt: Instant,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CacheServer {
    /// Creates a server with no channels.
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            delayed: VecDeque::new(),
            retry_interval: Duration::from_secs(RETRY_INTERVAL_SECS),
        }
    }

    /// Opens the two standard kernel caches and wires them to `resolver`.
    pub fn open_standard(resolver: Arc<Resolver>) -> CacheResult<Self> {
        let mut server = Self::new();
        server.register(
            UpcallChannel::open(EXPORT_CACHE)?,
            Box::new(ExportHandler::new(Arc::clone(&resolver))),
        );
        server.register(
            UpcallChannel::open(FH_CACHE)?,
            Box::new(FhHandler::new(resolver)),
        );
        Ok(server)
    }

    /// Registers a channel with the handler answering its requests.
    pub fn register(&mut self, channel: UpcallChannel, handler: Box<dyn UpcallHandler>) {
        self.channels.push((channel, handler));
    }

    /// Overrides the delay between retry attempts.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Number of requests currently held for retry.
    pub fn delayed_len(&self) -> usize {
        self.delayed.len()
    }

    /// Serves forever.
    pub fn run(&mut self) -> CacheResult<()> {
        loop {
            self.run_once()?;
        }
    }

    /// One wakeup: wait for readiness, service readable channels, then
    /// retry at most one delayed request.
    pub fn run_once(&mut self) -> CacheResult<()> {
        let timeout = self.next_timeout();
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);

        let mut fds: Vec<PollFd> = self
            .channels
            .iter()
            .map(|(channel, _)| PollFd::new(channel.fd(), PollFlags::POLLIN))
            .collect();
        match poll(&mut fds, PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX)) {
            Result::Ok(_) => {}
            Err(Errno::EINTR) => return Ok(()),
            Err(err) => return Err(err.into()),
        }
        let ready: Vec<usize> = fds
            .iter()
            .enumerate()
            .filter(|(_, fd)| {
                fd.revents()
                    .is_some_and(|revents| revents.intersects(PollFlags::POLLIN))
            })
            .map(|(index, _)| index)
            .collect();
        drop(fds);

        for index in ready {
            let request = self.channels[index].0.read_request();
            match request {
                Result::Ok(Some(line)) => self.dispatch(index, line, None),
                Result::Ok(None) => {}
                Err(err) => {
                    warn!("{}: dropping request: {}", self.channels[index].0.name(), err);
                }
            }
        }

        // One retry per wakeup keeps a long queue from starving fresh
        // requests.
        let due = self
            .delayed
            .front()
            .is_some_and(|request| request.last_attempt.elapsed() >= self.retry_interval);
        if due {
            if let Some(request) = self.delayed.pop_front() {
                debug!(
                    "{}: retrying delayed request",
                    self.channels[request.channel].0.name()
                );
                self.dispatch(request.channel, request.line, Some(Instant::now()));
            }
        }
        Ok(())
    }

    /// Hands `line` to the handler of channel `index`; a declined answer
    /// (re)joins the back of the retry queue.
    fn dispatch(&mut self, index: usize, line: String, attempted_at: Option<Instant>) {
        let outcome = {
            let (channel, handler) = &mut self.channels[index];
            handler.handle(&line, channel.writer())
        };
        match outcome {
            Result::Ok(HandleOutcome::Done) => {}
            Result::Ok(HandleOutcome::Delay) => {
                self.delayed.push_back(DelayedRequest {
                    line,
                    channel: index,
                    last_attempt: attempted_at.unwrap_or_else(Instant::now),
                });
            }
            Err(err) => {
                warn!(
                    "{}: dropping request: {}",
                    self.channels[index].0.name(),
                    err
                );
            }
        }
    }

    /// How long the next wait may be: until the next retry is due, capped.
    fn next_timeout(&self) -> Duration {
        let cap = Duration::from_secs(WAIT_CAP_SECS);
        match self.delayed.front() {
            Some(request) => self
                .retry_interval
                .saturating_sub(request.last_attempt.elapsed())
                .min(cap),
            None => cap,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for CacheServer {
    fn default() -> Self {
        Self::new()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{
        fs::File,
        io::{Read, Write},
        os::fd::OwnedFd,
        sync::Mutex,
    };

    use crate::exports::{ExactHost, Export, ExportFlags, ExportTable};

    use super::*;

    fn pipe_channel(name: &str) -> (UpcallChannel, os_pipe::PipeWriter, os_pipe::PipeReader) {
        let (request_read, request_write) = os_pipe::pipe().unwrap();
        let (reply_read, reply_write) = os_pipe::pipe().unwrap();
        let channel = UpcallChannel::from_files(
            name,
            File::from(OwnedFd::from(request_read)),
            File::from(OwnedFd::from(reply_write)),
        );
        (channel, request_write, reply_read)
    }

    fn read_reply(reply: &mut os_pipe::PipeReader) -> String {
        let mut buf = [0u8; 4096];
        let n = reply.read(&mut buf).unwrap();
        String::from_utf8(buf[..n].to_vec()).unwrap()
    }

    /// Delays the first `delays` requests, then answers, recording the
    /// order lines were seen in.
    struct Stubborn {
        delays: Mutex<usize>,
        seen: Mutex<Vec<String>>,
    }

    impl Stubborn {
        fn new(delays: usize) -> Self {
            Self {
                delays: Mutex::new(delays),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl UpcallHandler for Stubborn {
        fn cache_name(&self) -> &'static str {
            "nfsd.test"
        }

        fn handle(&self, line: &str, reply: &mut dyn std::io::Write) -> CacheResult<HandleOutcome> {
            self.seen.lock().unwrap().push(line.to_owned());
            let mut delays = self.delays.lock().unwrap();
            if *delays > 0 {
                *delays -= 1;
                return crate::Ok(HandleOutcome::Delay);
            }
            reply.write_all(b"done\n")?;
            crate::Ok(HandleOutcome::Done)
        }
    }

    #[test_log::test]
    fn test_export_request_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap().to_owned();
        let mut table = ExportTable::new();
        table.insert(
            Export::builder()
                .path(&*path)
                .client(Box::new(ExactHost("somehost".into())))
                .flags(ExportFlags::READONLY)
                .build(),
        );
        let resolver = Arc::new(Resolver::new(Arc::new(table)));

        let (channel, mut kernel, mut reply) = pipe_channel(EXPORT_CACHE);
        let mut server = CacheServer::new();
        server.register(channel, Box::new(crate::server::ExportHandler::new(resolver)));

        kernel
            .write_all(format!("somehost {}\n", path).as_bytes())
            .unwrap();
        server.run_once().unwrap();

        let text = read_reply(&mut reply);
        let fields: Vec<&str> = text.trim_end().split(' ').collect();
        assert_eq!(fields[0], "somehost");
        assert_eq!(fields[1], path);
        assert_eq!(&fields[3..7], ["1", "65534", "65534", "0"]);
    }

    #[test_log::test]
    fn test_delayed_requests_retry_in_fifo_order_one_per_wakeup() {
        let (channel, mut kernel, mut reply) = pipe_channel("nfsd.test");
        let handler = Arc::new(Stubborn::new(2));

        struct Shared(Arc<Stubborn>);
        impl UpcallHandler for Shared {
            fn cache_name(&self) -> &'static str {
                self.0.cache_name()
            }
            fn handle(
                &self,
                line: &str,
                reply: &mut dyn std::io::Write,
            ) -> CacheResult<HandleOutcome> {
                self.0.handle(line, reply)
            }
        }

        let mut server = CacheServer::new().with_retry_interval(Duration::from_millis(10));
        server.register(channel, Box::new(Shared(Arc::clone(&handler))));

        kernel.write_all(b"first\n").unwrap();
        server.run_once().unwrap();
        kernel.write_all(b"second\n").unwrap();
        server.run_once().unwrap();
        assert_eq!(server.delayed_len(), 2);

        // Both are due after the interval, but one wakeup retries only the
        // queue head.
        std::thread::sleep(Duration::from_millis(20));
        server.run_once().unwrap();
        assert_eq!(server.delayed_len(), 1);
        assert_eq!(read_reply(&mut reply), "done\n");

        std::thread::sleep(Duration::from_millis(20));
        server.run_once().unwrap();
        assert_eq!(server.delayed_len(), 0);
        assert_eq!(read_reply(&mut reply), "done\n");

        let seen = handler.seen.lock().unwrap();
        assert_eq!(*seen, ["first", "second", "first", "second"]);
    }

    #[test_log::test]
    fn test_malformed_request_is_dropped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        let mut table = ExportTable::new();
        table.insert(
            Export::builder()
                .path(path)
                .client(Box::new(ExactHost("somehost".into())))
                .build(),
        );
        let resolver = Arc::new(Resolver::new(Arc::new(table)));

        let (channel, mut kernel, _reply) = pipe_channel(EXPORT_CACHE);
        let mut server = CacheServer::new();
        server.register(channel, Box::new(crate::server::ExportHandler::new(resolver)));

        kernel.write_all(b"just-a-domain\n").unwrap();
        server.run_once().unwrap();
        assert_eq!(server.delayed_len(), 0);
    }
}
