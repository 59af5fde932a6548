//! Traversal of a single target
//!
//! A job walks one community or user listing page by page, or fetches one post,
//! and reconciles every item it sees with the archive. Pages within a job are
//! strictly sequential.

use crate::config::FetchConfig;
use crate::crawler::context::RunContext;
use crate::crawler::fetcher::{ApiRequest, ApiResponse, TransportError};
use crate::crawler::listing::{
    parse_account, parse_listing, parse_more_children, parse_post_page, Thing, DELETED_AUTHOR,
};
use crate::output::TargetReport;
use crate::state::{Decision, DedupPolicy};
use crate::storage::{NewItem, Storage};
use crate::target::{TargetKind, TargetSpec, TraversalJob};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashSet};

/// Most comment ids `/api/morechildren` accepts per call
const MORE_CHILDREN_BATCH: usize = 100;

/// Where a timestamp falls relative to the configured date bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPosition {
    /// At or after `before`: skipped, the walk goes on
    Newer,
    Inside,
    /// Before `after`: everything further down a listing is older still
    Older,
}

/// Date bounds: `after` inclusive, `before` exclusive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateWindow {
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
}

impl DateWindow {
    pub fn from_config(fetch: &FetchConfig) -> Self {
        Self {
            after: fetch.after.map(|bound| bound.0),
            before: fetch.before.map(|bound| bound.0),
        }
    }

    pub fn classify(&self, created_at: DateTime<Utc>) -> WindowPosition {
        if self.before.is_some_and(|before| created_at >= before) {
            WindowPosition::Newer
        } else if self.after.is_some_and(|after| created_at < after) {
            WindowPosition::Older
        } else {
            WindowPosition::Inside
        }
    }
}

/// Runs one traversal job to completion
///
/// Never fails: request and store errors are recorded in the returned report
/// and make the target partially downloaded.
pub async fn run_job(ctx: &RunContext, job: &TraversalJob) -> TargetReport {
    let mut walker = Walker::new(ctx, job.target.clone());

    if ctx.scheduler.is_cancelled() {
        walker.report.finish(true);
        return walker.report;
    }

    walker.run().await;
    walker.report
}

struct Walker<'a> {
    ctx: &'a RunContext,
    spec: TargetSpec,
    /// Items found by this job are stored under this scope
    scope: String,
    report: TargetReport,
    /// Distinct authors seen, lower-cased
    authors: BTreeSet<String>,
    cancelled: bool,
}

impl<'a> Walker<'a> {
    fn new(ctx: &'a RunContext, spec: TargetSpec) -> Self {
        let scope = spec.identifier();
        Self {
            ctx,
            report: TargetReport::new(scope.clone()),
            scope,
            spec,
            authors: BTreeSet::new(),
            cancelled: false,
        }
    }

    fn fetch_config(&self) -> &'a FetchConfig {
        &self.ctx.config.fetch
    }

    async fn run(&mut self) {
        tracing::info!("Archiving {}", self.scope);
        let fetch = self.fetch_config();

        if fetch.save_target_to_db {
            let saved = self
                .ctx
                .with_storage(|s| s.upsert_target(&self.spec, true));
            if let Err(e) = saved {
                self.report.fail(format!("saving target: {}", e));
            }
        }

        match self.spec.kind {
            TargetKind::Community | TargetKind::User => self.walk_listing().await,
            TargetKind::Post => self.archive_post().await,
        }

        if fetch.fetch_post_authors && !self.cancelled {
            self.archive_authors().await;
        }

        if let Err(e) = self.ctx.with_storage(|s| s.touch_target(&self.spec)) {
            self.report.fail(format!("updating target: {}", e));
        }

        self.report.finish(self.cancelled);
        tracing::info!(
            "{}: {} ({} new, {} replaced, {} marked deleted, {} unchanged)",
            self.scope,
            self.report.outcome.label(),
            self.report.counts.inserted,
            self.report.counts.replaced,
            self.report.counts.marked_deleted,
            self.report.counts.skipped
        );
    }

    async fn request(&mut self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        tracing::debug!("{}: requesting {}", self.scope, request.path);
        let response = self.ctx.get(&request).await?;
        self.report.requests += 1;
        Ok(response)
    }

    /// Records a failed request; cancellation only stops the job
    fn record_error(&mut self, context: &str, err: TransportError) {
        match err {
            TransportError::Cancelled => self.cancelled = true,
            other => self.report.fail(format!("{}: {}", context, other)),
        }
    }

    fn store(&mut self, item: &NewItem, policy: &DedupPolicy) -> Option<Decision> {
        match self.ctx.with_storage(|s| s.apply_item(item, policy)) {
            Ok(decision) => {
                tracing::trace!("{} {}: {:?}", self.scope, item.remote_id, decision);
                self.report.counts.record(decision);
                Some(decision)
            }
            Err(e) => {
                self.report.fail(format!("storing {}: {}", item.remote_id, e));
                None
            }
        }
    }

    fn note_author(&mut self, item: &NewItem) {
        if let Some(author) = &item.author {
            if author != DELETED_AUTHOR {
                self.authors.insert(author.to_ascii_lowercase());
            }
        }
    }

    /// Walks a community or user listing, newest first
    async fn walk_listing(&mut self) {
        let fetch = self.fetch_config();
        let path = match self.spec.kind {
            TargetKind::Community => format!("/r/{}/new.json", self.spec.name),
            _ => format!("/user/{}/submitted.json", self.spec.name),
        };
        let window = DateWindow::from_config(fetch);
        let policy = fetch.dedup_policy();

        let mut examined: u32 = 0;
        let mut cursor: Option<String> = None;

        loop {
            let requested = match fetch.limit {
                Some(limit) => fetch.page_size.min(limit.saturating_sub(examined)),
                None => fetch.page_size,
            };
            if requested == 0 {
                break;
            }

            let mut request = ApiRequest::new(path.as_str()).param("limit", requested);
            if let Some(after) = &cursor {
                request = request.param("after", after);
            }

            let page = match self
                .request(request)
                .await
                .and_then(|response| parse_listing(&response))
            {
                Ok(page) => page,
                Err(e) => {
                    let context = format!("listing page after {:?}", cursor);
                    self.record_error(&context, e);
                    break;
                }
            };

            let received = page.children.len();
            let mut stop = false;

            for thing in page.children.iter().filter(|t| t.kind == "t3") {
                let Some(item) = thing.to_new_item(&self.scope) else {
                    self.report
                        .warn(format!("unreadable listing entry {:?}", thing.fullname()));
                    continue;
                };

                match window.classify(item.created_at) {
                    WindowPosition::Newer => continue,
                    WindowPosition::Older => {
                        tracing::debug!("{}: reached items older than the window", self.scope);
                        stop = true;
                        break;
                    }
                    WindowPosition::Inside => {}
                }

                examined += 1;
                self.note_author(&item);

                match self.store(&item, &policy) {
                    Some(Decision::Halt) => {
                        tracing::info!(
                            "{}: {} already archived, stopping",
                            self.scope,
                            item.remote_id
                        );
                        stop = true;
                        break;
                    }
                    Some(decision) if decision.stores_content() => {
                        self.archive_media(thing).await;
                        if fetch.fetch_comments {
                            self.archive_thread(&item.remote_id).await;
                        }
                    }
                    _ => {}
                }

                if self.cancelled || fetch.limit.is_some_and(|limit| examined >= limit) {
                    stop = true;
                    break;
                }
            }

            if stop || self.cancelled || received < requested as usize {
                break;
            }

            match page.after {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
    }

    /// Archives a single post job
    async fn archive_post(&mut self) {
        let fetch = self.fetch_config();
        let post_id = self.spec.name.clone();

        let (post, comments) = match self.fetch_post_page(&post_id).await {
            Ok(page) => page,
            Err(e) => {
                self.record_error(&format!("post {}", post_id), e);
                return;
            }
        };

        let Some(item) = post.to_new_item(&self.scope) else {
            self.report.fail(format!("post {} has no id or timestamp", post_id));
            return;
        };

        self.note_author(&item);
        let decision = self.store(&item, &fetch.dedup_policy());
        if decision.is_some_and(|d| d.stores_content()) {
            self.archive_media(&post).await;
        }

        if fetch.fetch_comments {
            self.archive_comments(&item.remote_id, comments).await;
        }
    }

    async fn fetch_post_page(
        &mut self,
        post_id: &str,
    ) -> Result<(Thing, Vec<Thing>), TransportError> {
        let request = ApiRequest::new(format!("/comments/{}.json", post_id));
        let response = self.request(request).await?;
        parse_post_page(&response)
    }

    /// Fetches and archives the comments of a post found in a listing
    async fn archive_thread(&mut self, fullname: &str) {
        let post_id = fullname.trim_start_matches("t3_");
        match self.fetch_post_page(post_id).await {
            Ok((_, comments)) => self.archive_comments(fullname, comments).await,
            Err(e) => self.record_error(&format!("comments of {}", fullname), e),
        }
    }

    /// Archives a comment tree, expanding `more` stubs in batches
    ///
    /// If an expansion fails, the comments stored so far stay archived and the
    /// target is reported as partial.
    async fn archive_comments(&mut self, post_fullname: &str, top_level: Vec<Thing>) {
        // Continue mode only short-circuits listings
        let policy = DedupPolicy {
            continue_mode: false,
            ..self.fetch_config().dedup_policy()
        };

        let mut stack: Vec<Thing> = top_level.into_iter().rev().collect();
        let mut pending: Vec<String> = Vec::new();
        let mut requested: HashSet<String> = HashSet::new();

        loop {
            while let Some(thing) = stack.pop() {
                if let Some(more) = thing.more_stub() {
                    pending.extend(
                        more.children
                            .into_iter()
                            .filter(|id| !requested.contains(id)),
                    );
                    continue;
                }
                if thing.kind != "t1" {
                    continue;
                }

                if let Some(item) = thing.to_new_item(&self.scope) {
                    self.note_author(&item);
                    self.store(&item, &policy);
                }
                stack.extend(thing.replies().into_iter().rev());
            }

            if pending.is_empty() || self.cancelled {
                break;
            }

            let batch: Vec<String> = pending
                .drain(..pending.len().min(MORE_CHILDREN_BATCH))
                .collect();
            requested.extend(batch.iter().cloned());

            let request = ApiRequest::new("/api/morechildren.json")
                .param("api_type", "json")
                .param("link_id", post_fullname)
                .param("children", batch.join(","));

            match self
                .request(request)
                .await
                .and_then(|response| parse_more_children(&response))
            {
                Ok(things) => stack.extend(things.into_iter().rev()),
                Err(e) => {
                    let context = format!(
                        "comment tree of {} left partial ({} ids unexpanded)",
                        post_fullname,
                        batch.len() + pending.len()
                    );
                    self.record_error(&context, e);
                    break;
                }
            }
        }
    }

    /// Stores the profile of every distinct author seen by this job
    ///
    /// Only runs when the job saw more than one author. Unless target saving
    /// is off, authors become unsaved targets so `previous/` does not pick
    /// them up.
    async fn archive_authors(&mut self) {
        if self.authors.len() < 2 {
            return;
        }

        let policy = DedupPolicy {
            continue_mode: false,
            ..self.fetch_config().dedup_policy()
        };
        let authors: Vec<String> = self.authors.iter().cloned().collect();
        tracing::info!("{}: fetching {} author profiles", self.scope, authors.len());

        for name in authors {
            let spec = TargetSpec::new(TargetKind::User, &name);
            let request = ApiRequest::new(format!("/user/{}/about.json", name));

            let account = match self
                .request(request)
                .await
                .and_then(|response| parse_account(&response))
            {
                Ok(account) => account,
                Err(TransportError::Cancelled) => {
                    self.cancelled = true;
                    break;
                }
                Err(e) => {
                    // Suspended and deleted accounts are common
                    self.report.warn(format!("profile of {}: {}", name, e));
                    continue;
                }
            };

            let Some(item) = account.to_new_item(&spec.identifier()) else {
                self.report.warn(format!("profile of {} has no id", name));
                continue;
            };

            self.store(&item, &policy);
            if !self.fetch_config().save_target_to_db {
                continue;
            }
            if let Err(e) = self.ctx.with_storage(|s| s.upsert_target(&spec, false)) {
                self.report.fail(format!("saving author {}: {}", name, e));
            }
        }
    }

    async fn archive_media(&mut self, thing: &Thing) {
        let (Some(tool), Some(url)) = (&self.ctx.media, thing.media_url()) else {
            return;
        };
        let Some(stem) = thing.fullname() else {
            return;
        };

        if let Err(e) = tool.archive(url, &stem).await {
            self.report.warn(format!("media for {}: {}", stem, e));
        }
    }
}
