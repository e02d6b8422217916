// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Resolve remote paths over HTTP HEAD/GET requests.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::io::Read;
use std::sync::Mutex;
use std::time::Duration;

use chrono::DateTime;
use log::{debug, warn};
use url::Url;

use crate::error::FsError;
use crate::listing;
use crate::remote::{
    DirListing, FileStat, NodeKind, OpenMode, Probe, RangeRead, RemoteBackend, RemoteChild,
    RemotePath, RemoteReader,
};

/// Redirect hops chased manually before giving up.
const MAX_REDIRECT_HOPS: usize = 5;
/// Upper bound on a buffered listing body.
const MAX_LISTING_BYTES: u64 = 8 * 1024 * 1024;

/// Request options applied uniformly to every HEAD/GET the backend
/// issues. There is no process-wide configuration; one value per
/// backend instance.
#[derive(Debug, Clone, Default)]
pub struct HttpOptions {
    /// Per-request timeout; `None` leaves requests unbounded.
    pub timeout: Option<Duration>,
    /// Custom `User-Agent` header.
    pub user_agent: Option<String>,
}

/// HTTP implementation of the remote path contract.
///
/// One long-lived agent (connection pool) serves every request for the
/// lifetime of a mounted filesystem. Redirects are disabled agent-wide
/// and handled explicitly where they carry meaning.
pub struct HttpBackend {
    agent: ureq::Agent,
    kinds: Mutex<HashMap<String, NodeKind>>,
}

impl HttpBackend {
    /// Build a backend from the supplied options.
    #[must_use]
    pub fn new(options: HttpOptions) -> Self {
        let mut builder = ureq::AgentBuilder::new().redirects(0);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = &options.user_agent {
            builder = builder.user_agent(user_agent);
        }
        Self {
            agent: builder.build(),
            kinds: Mutex::new(HashMap::new()),
        }
    }

    /// Record a resolved node kind. First resolution wins; the
    /// determination is never re-derived afterwards.
    fn remember(&self, path: &RemotePath, kind: NodeKind) {
        let mut kinds = self.kinds.lock().expect("kind cache lock");
        kinds.entry(path.to_uri()).or_insert(kind);
    }

    fn known_kind(&self, path: &RemotePath) -> Option<NodeKind> {
        let kinds = self.kinds.lock().expect("kind cache lock");
        kinds.get(&path.to_uri()).copied()
    }

    fn dispatch(request: ureq::Request) -> Result<ureq::Response, FsError> {
        match request.call() {
            Ok(response) => Ok(response),
            Err(ureq::Error::Status(404, _)) => Err(FsError::NotFound),
            Err(ureq::Error::Status(403, _)) => Err(FsError::PermissionDenied),
            Err(ureq::Error::Status(code, _)) => Err(FsError::Http(code)),
            Err(ureq::Error::Transport(transport)) => {
                Err(FsError::Transport(transport.to_string()))
            }
        }
    }

    fn read_limited(response: ureq::Response, max: u64) -> Result<Vec<u8>, FsError> {
        let mut body = Vec::new();
        response
            .into_reader()
            .take(max)
            .read_to_end(&mut body)
            .map_err(|err| FsError::Transport(err.to_string()))?;
        Ok(body)
    }

    fn header_mtime(response: &ureq::Response) -> Option<i64> {
        response
            .header("Last-Modified")
            .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
            .map(|dt| dt.timestamp())
    }

    fn resolve_location(base: &str, location: &str) -> Result<String, FsError> {
        let base = Url::parse(base)
            .map_err(|err| FsError::Protocol(format!("invalid base url {base}: {err}")))?;
        let target = base
            .join(location)
            .map_err(|err| FsError::Protocol(format!("invalid redirect {location}: {err}")))?;
        Ok(target.into())
    }

    /// True when `location` is the slash-suffixed form of `url`: the
    /// canonical directory hint, not a real relocation.
    fn is_slash_redirect(url: &str, location: &str) -> bool {
        match Self::resolve_location(url, location) {
            Ok(resolved) => resolved.trim_end_matches('/') == url.trim_end_matches('/'),
            Err(_) => false,
        }
    }

    /// GET a directory listing page, chasing redirects explicitly.
    fn fetch_listing_page(&self, path: &RemotePath) -> Result<(String, Option<i64>), FsError> {
        let mut url = path.to_dir_uri();
        for _ in 0..=MAX_REDIRECT_HOPS {
            let response = Self::dispatch(self.agent.get(&url))?;
            match response.status() {
                301 | 302 | 303 | 307 | 308 => {
                    let Some(location) = response.header("Location") else {
                        return Err(FsError::Protocol(format!(
                            "redirect from {url} without a Location header"
                        )));
                    };
                    url = Self::resolve_location(&url, location)?;
                }
                status if (200..300).contains(&status) => {
                    let mtime = Self::header_mtime(&response);
                    let body = Self::read_limited(response, MAX_LISTING_BYTES)?;
                    let body = String::from_utf8_lossy(&body).into_owned();
                    return Ok((body, mtime));
                }
                status => return Err(FsError::Http(status)),
            }
        }
        Err(FsError::Protocol(format!("too many redirects for {url}")))
    }

    /// Last-resort modification time: this node's entry in its parent's
    /// listing.
    fn mtime_from_parent(&self, path: &RemotePath) -> Option<i64> {
        let parent = path.parent()?;
        let name = path.name()?;
        let listing = self.list_children(&parent).ok()?;
        listing
            .children
            .iter()
            .find(|child| child.entry.name.trim_end_matches('/') == name)
            .and_then(|child| child.entry.modified)
            .map(|dt| dt.and_utc().timestamp())
    }

    fn stat_hop(
        &self,
        path: &RemotePath,
        follow_redirects: bool,
        hops: usize,
    ) -> Result<Probe, FsError> {
        let url = path.to_uri();
        let response = Self::dispatch(self.agent.head(&url))?;
        let status = response.status();
        if matches!(status, 301 | 302) {
            let location = response.header("Location").unwrap_or_default();
            if follow_redirects
                && hops < MAX_REDIRECT_HOPS
                && !location.is_empty()
                && !Self::is_slash_redirect(&url, location)
            {
                let target = Self::resolve_location(&url, location)?;
                let target = RemotePath::parse(&target)?;
                return self.stat_hop(&target, follow_redirects, hops + 1);
            }
            debug!("{url}: redirect marks a directory");
            self.remember(path, NodeKind::Directory);
            return Ok(Probe::Directory(FileStat::directory()));
        }
        if !(200..300).contains(&status) {
            return Err(FsError::Http(status));
        }
        let mut stat = FileStat::file();
        stat.size = response
            .header("Content-Length")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        if let Some(mtime) = Self::header_mtime(&response) {
            stat.set_time(mtime);
        } else if let Some(mtime) = self.mtime_from_parent(path) {
            stat.set_time(mtime);
        }
        self.remember(path, NodeKind::File);
        Ok(Probe::File(stat))
    }
}

impl RemoteBackend for HttpBackend {
    fn list_children(&self, path: &RemotePath) -> Result<DirListing, FsError> {
        let (body, mtime) = self.fetch_listing_page(path)?;
        let parsed = listing::parse_str(&body)?;
        let mut children = Vec::with_capacity(parsed.entries.len());
        for entry in parsed.entries {
            let kind = if entry.is_dir() {
                NodeKind::Directory
            } else {
                NodeKind::File
            };
            let child = path.join(entry.name.trim_end_matches('/'));
            self.remember(&child, kind);
            children.push(RemoteChild {
                path: child,
                kind,
                entry,
            });
        }
        debug!("{}: listed {} children", path.to_uri(), children.len());
        Ok(DirListing {
            label: parsed.label,
            children,
            mtime,
        })
    }

    fn stat(&self, path: &RemotePath, follow_redirects: bool) -> Result<Probe, FsError> {
        if path.is_root() {
            return Ok(Probe::Directory(FileStat::directory()));
        }
        if self.known_kind(path) == Some(NodeKind::Directory) {
            return Ok(Probe::Directory(FileStat::directory()));
        }
        self.stat_hop(path, follow_redirects, 0)
    }

    fn open(&self, path: &RemotePath, mode: OpenMode) -> Result<RemoteReader, FsError> {
        let url = path.to_uri();
        let response = Self::dispatch(self.agent.get(&url))?;
        let status = response.status();
        if matches!(status, 301 | 302 | 303 | 307 | 308) {
            // A byte stream was expected; a redirect here is not a
            // directory hint but a broken expectation.
            return Err(FsError::Protocol(format!(
                "redirect where a byte stream was expected: {url}"
            )));
        }
        if !(200..300).contains(&status) {
            return Err(FsError::Http(status));
        }
        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|err| FsError::Transport(err.to_string()))?;
        if mode == OpenMode::Text && std::str::from_utf8(&body).is_err() {
            return Err(FsError::Transport(format!(
                "{url}: body is not valid UTF-8 text"
            )));
        }
        Ok(RemoteReader::new(body))
    }

    fn read_range(&self, path: &RemotePath, offset: u64, end: u64) -> Result<RangeRead, FsError> {
        let url = path.to_uri();
        let range = format!("bytes={offset}-{end}");
        let limit = end.saturating_sub(offset).saturating_add(1);
        match self.agent.get(&url).set("Range", &range).call() {
            Ok(response) => match response.status() {
                206 => Ok(RangeRead::Ranged(Self::read_limited(response, limit)?)),
                200 => Ok(RangeRead::Full(Self::read_limited(response, limit)?)),
                301 | 302 | 303 | 307 | 308 => Err(FsError::Protocol(format!(
                    "redirect on a ranged request: {url}"
                ))),
                status => Err(FsError::Http(status)),
            },
            Err(ureq::Error::Status(416, _)) => {
                warn!("{url}: range {range} not satisfiable; size likely stale");
                Ok(RangeRead::OutOfRange)
            }
            Err(ureq::Error::Status(404, _)) => Err(FsError::NotFound),
            Err(ureq::Error::Status(403, _)) => Err(FsError::PermissionDenied),
            Err(ureq::Error::Status(code, _)) => Err(FsError::Http(code)),
            Err(ureq::Error::Transport(transport)) => {
                Err(FsError::Transport(transport.to_string()))
            }
        }
    }
}
