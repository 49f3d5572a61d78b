//! One open document: session state, the page cache, undo history and the
//! save protocol wired together.

use std::sync::Arc;

use pagemark_core::{
    clean_answer, resolve_scope, validate_set, ApiError, AutosaveDue, BackendKind, Debouncer,
    DocumentKey, DocumentRecord, EditorConfig, HistoryEntry, LinkOption, LinkedContext, Markup,
    MarkupError, MarkupsPayload, PersistenceApi, PromptKind, PromptRequest, SaveError,
    SaveSettled, SaveStatus, ScopeResolution, Session, Snapshot, TextPrompt, ToolMode, ViewState,
    ViewStateStore, Zoom, MAX_MARKUPS,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::backend::{
    edit_markup, CanvasEvent, EditAction, EditMenu, GestureContext, GestureOutcome, PointerEvent,
    ToolStyle,
};
use crate::cache::{DocumentView, FallbackView, PageCache, RenderReport};
use crate::engine::EngineProvider;
use crate::error::RenderError;
use crate::layout::Viewport;

/// Collaborators an editor is built from.
pub struct EditorDeps {
    pub api: Arc<dyn PersistenceApi>,
    pub provider: Arc<dyn EngineProvider>,
    pub prompt: Arc<dyn TextPrompt>,
    pub views: Arc<dyn ViewStateStore>,
    pub document_key: DocumentKey,
}

pub struct Editor {
    session: Session,
    view: DocumentView,
    api: Arc<dyn PersistenceApi>,
    prompt: Arc<dyn TextPrompt>,
    views: Arc<dyn ViewStateStore>,
    key: DocumentKey,
    config: EditorConfig,
    style: ToolStyle,
    debouncer: Debouncer,
    autosave_rx: UnboundedReceiver<AutosaveDue>,
    pending_snapshot: Option<Snapshot>,
    edit_menu: Option<EditMenu>,
    document: Option<DocumentRecord>,
    links: Vec<LinkOption>,
    resolution: ScopeResolution,
    flatten_task: Option<JoinHandle<()>>,
}

impl Editor {
    /// Opens a document session. Nothing here is fatal: an unreachable
    /// service yields an empty markup set, and a rendering failure yields
    /// the read-only fallback view.
    #[instrument(skip(deps, config))]
    pub async fn load(
        deps: EditorDeps,
        config: EditorConfig,
        document_id: u64,
        requested: Option<LinkedContext>,
    ) -> Self {
        let EditorDeps {
            api,
            provider,
            prompt,
            views,
            document_key,
        } = deps;

        let restored = match views.load(document_key) {
            Ok(state) => state.map(|s| s.scale),
            Err(err) => {
                warn!(%err, "failed to read view state");
                None
            }
        };
        let mut session = Session::new(document_id, Zoom::restored(config.zoom.clone(), restored));

        let info = api.document().await;
        let resolution = resolve_scope(requested, info.as_ref().map(|i| i.linked.as_slice()));
        session.apply_scope(&resolution);
        let (document, links) = match info {
            Ok(info) => (Some(info.document), info.linked),
            Err(_) => (None, Vec::new()),
        };

        let view = open_view(api.as_ref(), provider.as_ref(), &config, session.scale()).await;
        let page_count = view.cache().map(PageCache::page_count);
        let markups = fetch_valid_markups(api.as_ref(), session.scope(), page_count).await;
        session.replace_markups(markups);

        let (debouncer, autosave_rx) = Debouncer::new(config.save.debounce);

        info!(
            document_id,
            markups = session.markups().len(),
            scope = ?session.scope(),
            fallback = view.is_fallback(),
            "document loaded"
        );

        Self {
            session,
            view,
            api,
            prompt,
            views,
            key: document_key,
            config,
            style: ToolStyle::default(),
            debouncer,
            autosave_rx,
            pending_snapshot: None,
            edit_menu: None,
            document,
            links,
            resolution,
            flatten_task: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn markups(&self) -> &[Markup] {
        self.session.markups()
    }

    pub fn view(&self) -> &DocumentView {
        &self.view
    }

    pub fn cache(&self) -> Option<&PageCache> {
        self.view.cache()
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn style_mut(&mut self) -> &mut ToolStyle {
        &mut self.style
    }

    pub fn document(&self) -> Option<&DocumentRecord> {
        self.document.as_ref()
    }

    /// Scopes the document is linked to, as reported at load time.
    pub fn links(&self) -> &[LinkOption] {
        &self.links
    }

    pub fn scope(&self) -> Option<LinkedContext> {
        self.session.scope()
    }

    pub fn scope_resolution(&self) -> &ScopeResolution {
        &self.resolution
    }

    pub fn save_status(&self) -> SaveStatus {
        self.session.save.status()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.session.save.last_error()
    }

    pub fn is_dirty(&self) -> bool {
        self.session.save.is_dirty()
    }

    pub fn can_undo(&self) -> bool {
        self.session.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.session.history.can_redo()
    }

    /// Whether a pointer gesture started on a rendered page and has not been
    /// released yet.
    pub fn gesture_in_progress(&self) -> bool {
        self.pending_snapshot.is_some()
    }

    pub fn edit_menu(&self) -> Option<&EditMenu> {
        self.edit_menu.as_ref()
    }

    pub fn set_edit_mode(&mut self, edit_mode: bool) {
        self.session.set_edit_mode(edit_mode);
        if !edit_mode {
            self.edit_menu = None;
        }
    }

    /// Picking a drawing tool implies edit mode.
    pub fn set_tool(&mut self, tool: ToolMode) {
        if tool != ToolMode::None {
            self.session.set_edit_mode(true);
        }
        self.session.set_tool(tool);
    }

    pub fn set_backend(&mut self, kind: BackendKind) {
        if let Some(cache) = self.view.cache_mut() {
            cache.swap_backend(kind, self.session.markups_mut());
        }
        self.config.backend = kind;
        self.edit_menu = None;
    }

    pub async fn zoom_in(&mut self) -> Result<bool, RenderError> {
        match self.session.zoom().step_in() {
            Some(next) => self.apply_scale(next).await,
            None => Ok(false),
        }
    }

    pub async fn zoom_out(&mut self) -> Result<bool, RenderError> {
        match self.session.zoom().step_out() {
            Some(next) => self.apply_scale(next).await,
            None => Ok(false),
        }
    }

    /// Clamps and applies a new scale, rebuilding the page cache when it
    /// actually changed. A failed rebuild leaves the previous scale and its
    /// pages in place.
    pub async fn set_scale(&mut self, scale: f64) -> Result<bool, RenderError> {
        match self.session.zoom().target(scale) {
            Some(next) => self.apply_scale(next).await,
            None => Ok(false),
        }
    }

    async fn apply_scale(&mut self, scale: f64) -> Result<bool, RenderError> {
        if let Some(cache) = self.view.cache_mut() {
            if let Err(err) = cache.rescale(scale, self.session.markups_mut()).await {
                warn!(%err, scale, "rescale failed; keeping the current scale");
                return Err(err);
            }
        }
        self.session.zoom_mut().set(scale);
        self.edit_menu = None;
        self.persist_view_state();
        Ok(true)
    }

    pub async fn on_viewport(&mut self, viewport: Viewport) -> RenderReport {
        match self.view.cache_mut() {
            Some(cache) => {
                cache
                    .update_visibility(viewport, self.session.markups_mut())
                    .await
            }
            None => RenderReport::default(),
        }
    }

    pub async fn show_pages<I>(&mut self, pages: I) -> RenderReport
    where
        I: IntoIterator<Item = usize>,
    {
        match self.view.cache_mut() {
            Some(cache) => cache.set_visible(pages, self.session.markups_mut()).await,
            None => RenderReport::default(),
        }
    }

    /// Feeds one pointer event to the backend of `page`. A click that needs
    /// text suspends on the prompt before the markup is created.
    pub async fn pointer(&mut self, page: usize, event: PointerEvent) -> GestureOutcome {
        let rendered = self
            .view
            .cache()
            .map_or(false, |c| c.backend(page).is_some());
        if !rendered {
            if let PointerEvent::Up(_) = event {
                self.pending_snapshot = None;
            }
            return GestureOutcome::Idle;
        }
        if let PointerEvent::Down(_) = event {
            self.pending_snapshot = Some(self.full_snapshot());
        }
        let Some(backend) = self.view.cache_mut().and_then(|c| c.backend_mut(page)) else {
            return GestureOutcome::Idle;
        };
        let mut ctx = GestureContext {
            tool: self.session.tool(),
            edit_mode: self.session.edit_mode(),
            markups: self.session.markups_mut(),
            style: &self.style,
            max_points: self.config.ink.max_points,
        };
        let outcome = backend.handle_pointer(event, &mut ctx);
        let events = backend.drain_events();
        self.process_events(events);

        let outcome = match outcome {
            GestureOutcome::Changed => {
                self.commit_change(page);
                GestureOutcome::Changed
            }
            GestureOutcome::Prompt(pending) => {
                let request = PromptRequest::new(pending.kind);
                match clean_answer(self.prompt.ask(&request).await) {
                    Some(text) => {
                        if self.complete_prompt(&pending, text) {
                            GestureOutcome::Changed
                        } else {
                            GestureOutcome::Idle
                        }
                    }
                    None => {
                        debug!(page, "prompt cancelled");
                        GestureOutcome::Idle
                    }
                }
            }
            GestureOutcome::Selected(menu) => {
                self.edit_menu = Some(menu.clone());
                GestureOutcome::Selected(menu)
            }
            GestureOutcome::SelectionCleared => {
                self.edit_menu = None;
                GestureOutcome::SelectionCleared
            }
            GestureOutcome::Idle => GestureOutcome::Idle,
        };
        if let PointerEvent::Up(_) = event {
            self.pending_snapshot = None;
        }
        outcome
    }

    fn complete_prompt(&mut self, pending: &crate::backend::PendingPrompt, text: String) -> bool {
        let Some(backend) = self
            .view
            .cache_mut()
            .and_then(|c| c.backend_mut(pending.page))
        else {
            return false;
        };
        let mut ctx = GestureContext {
            tool: self.session.tool(),
            edit_mode: self.session.edit_mode(),
            markups: self.session.markups_mut(),
            style: &self.style,
            max_points: self.config.ink.max_points,
        };
        let created = backend.complete_prompt(pending, text, &mut ctx);
        let events = backend.drain_events();
        self.process_events(events);
        if created {
            self.commit_change(pending.page);
        }
        created
    }

    fn process_events(&mut self, events: Vec<CanvasEvent>) {
        for event in events {
            debug!(?event, "canvas event");
            match event {
                CanvasEvent::SelectionCleared => self.edit_menu = None,
                CanvasEvent::ObjectRemoved { markup_id, .. } => {
                    if self
                        .edit_menu
                        .as_ref()
                        .map_or(false, |menu| menu.markup_id == markup_id)
                    {
                        self.edit_menu = None;
                    }
                }
                CanvasEvent::ObjectAdded { .. }
                | CanvasEvent::ObjectModified { .. }
                | CanvasEvent::SelectionCreated { .. } => {}
            }
        }
    }

    /// Applies an edit menu action to a markup on any page.
    pub fn apply_edit(&mut self, markup_id: &str, action: EditAction) -> bool {
        let Some(page) = self.session.find(markup_id).map(|m| m.page) else {
            return false;
        };
        let snapshot = self.full_snapshot();
        let changed = match self.view.cache_mut().and_then(|c| c.backend_mut(page)) {
            Some(backend) => {
                let mut ctx = GestureContext {
                    tool: self.session.tool(),
                    edit_mode: self.session.edit_mode(),
                    markups: self.session.markups_mut(),
                    style: &self.style,
                    max_points: self.config.ink.max_points,
                };
                let changed = backend.apply_edit(markup_id, &action, &mut ctx);
                let events = backend.drain_events();
                self.process_events(events);
                changed
            }
            None => edit_unrendered(self.session.markups_mut(), markup_id, &action),
        };
        if !changed {
            return false;
        }
        if action == EditAction::Delete
            && self
                .edit_menu
                .as_ref()
                .map_or(false, |menu| menu.markup_id == markup_id)
        {
            self.edit_menu = None;
        }
        self.pending_snapshot = Some(snapshot);
        self.commit_change(page);
        true
    }

    pub fn delete_markup(&mut self, markup_id: &str) -> bool {
        self.apply_edit(markup_id, EditAction::Delete)
    }

    /// Adds a fully formed markup, as an import or scripted gesture would.
    pub fn add_markup(&mut self, markup: Markup) -> Result<(), MarkupError> {
        markup.validate(self.page_count())?;
        let page = markup.page;
        let snapshot = self.full_snapshot();
        self.session.history.record(snapshot);
        self.session.markups_mut().push(markup);
        self.redraw_page(page);
        self.mark_dirty();
        Ok(())
    }

    /// Replaces the whole markup set in one undoable step.
    pub fn replace_all(&mut self, markups: Vec<Markup>) -> Result<(), MarkupError> {
        validate_set(&markups, self.page_count())?;
        let snapshot = self.full_snapshot();
        self.session.history.record(snapshot);
        self.session.replace_markups(markups);
        self.redraw_all();
        self.mark_dirty();
        Ok(())
    }

    pub fn undo(&mut self) -> bool {
        self.sync_all();
        let current = self.session.markups().to_vec();
        match self.session.history.undo(&current) {
            Some(previous) => {
                self.install(previous);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        self.sync_all();
        let current = self.session.markups().to_vec();
        match self.session.history.redo(&current) {
            Some(next) => {
                self.install(next);
                true
            }
            None => false,
        }
    }

    /// Makes `markups` canonical and pushes them into every backend. The
    /// backends' own change notifications during the redraw must not turn
    /// into history entries.
    fn install(&mut self, markups: Vec<Markup>) {
        self.session.history.set_replaying(true);
        self.session.replace_markups(markups);
        self.redraw_all();
        if let Some(cache) = self.view.cache_mut() {
            for page in cache.rendered_pages() {
                if let Some(backend) = cache.backend_mut(page) {
                    backend.drain_events();
                }
            }
        }
        self.edit_menu = None;
        self.session.history.set_replaying(false);
        self.mark_dirty();
    }

    /// Sends the current markups. Autosave passes `skip_flatten = true`; an
    /// explicit save also asks the service to flatten, best effort.
    #[instrument(skip(self))]
    pub async fn perform_save(&mut self, skip_flatten: bool) -> Result<SaveStatus, SaveError> {
        let Some(ticket) = self.session.save.begin()? else {
            return Ok(self.session.save.status());
        };
        self.debouncer.cancel();

        // The payload is fixed before the request yields.
        self.sync_all();
        let markups = self.session.markups().to_vec();
        if let Err(err) = validate_set(&markups, self.page_count()) {
            self.session.save.finish(ticket, Err(err.to_string()));
            return Err(SaveError::Invalid(err));
        }
        let scope = self.session.scope();
        let payload = MarkupsPayload::new(scope, markups);

        match self.api.put_markups(&payload).await {
            Ok(()) => {
                if let SaveSettled::Saved { resave: true } = self.session.save.finish(ticket, Ok(()))
                {
                    self.debouncer.schedule();
                }
                if !skip_flatten {
                    self.spawn_flatten(scope);
                }
                Ok(SaveStatus::Saved)
            }
            Err(err) => {
                if !err.is_retryable() {
                    warn!(%err, "save rejected; the scope is not valid for this document");
                }
                self.session.save.finish(ticket, Err(err.to_string()));
                Err(SaveError::Rejected(err))
            }
        }
    }

    fn spawn_flatten(&mut self, scope: Option<LinkedContext>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime; document flatten skipped");
            return;
        };
        let api = Arc::clone(&self.api);
        self.flatten_task = Some(runtime.spawn(async move {
            match api.save_document(scope).await {
                Ok(()) => info!("document flattened"),
                Err(err) => warn!(%err, "document flatten failed"),
            }
        }));
    }

    /// Waits for a flatten started by [`Editor::perform_save`], if any.
    pub async fn wait_for_flatten(&mut self) {
        if let Some(task) = self.flatten_task.take() {
            if let Err(err) = task.await {
                warn!(%err, "flatten task did not complete");
            }
        }
    }

    /// The explicit "Save" action: saves pending markups first and only
    /// flattens if that succeeded.
    #[instrument(skip(self))]
    pub async fn perform_save_document(&mut self) -> Result<(), SaveError> {
        if self.session.save.needs_save() {
            self.perform_save(true).await?;
        }
        self.api
            .save_document(self.session.scope())
            .await
            .map_err(SaveError::Flatten)?;
        info!("document saved and flattened");
        Ok(())
    }

    /// Saves for every debounce timer that has already fired.
    pub async fn run_due_autosaves(&mut self) -> Option<Result<SaveStatus, SaveError>> {
        let mut result = None;
        while let Ok(due) = self.autosave_rx.try_recv() {
            if self.debouncer.accept(due) {
                result = Some(self.perform_save(true).await);
            }
        }
        result
    }

    /// Waits for the pending debounce timer and saves when it fires.
    /// Returns `None` straight away when no autosave is scheduled.
    pub async fn next_autosave(&mut self) -> Option<Result<SaveStatus, SaveError>> {
        while self.debouncer.is_scheduled() {
            let due = self.autosave_rx.recv().await?;
            if self.debouncer.accept(due) {
                return Some(self.perform_save(true).await);
            }
        }
        None
    }

    pub fn autosave_pending(&self) -> bool {
        self.debouncer.is_scheduled()
    }

    pub async fn history(&self) -> Result<Vec<HistoryEntry>, ApiError> {
        self.api.history(self.session.scope()).await
    }

    /// Restores a stored version and reloads it. The reload is an external
    /// overwrite: it bypasses undo and leaves nothing to save.
    #[instrument(skip(self))]
    pub async fn restore_version(&mut self, version: u64) -> Result<(), ApiError> {
        let scope = self.session.scope();
        self.api.restore(version, scope).await?;
        let markups = self.api.fetch_markups(scope).await?;
        let markups = drop_invalid(markups, self.page_count());
        self.debouncer.cancel();
        self.session.replace_markups(markups);
        self.session.history.clear();
        self.session.save.reset_clean();
        self.edit_menu = None;
        self.redraw_all();
        info!(version, markups = self.session.markups().len(), "version restored");
        Ok(())
    }

    pub async fn ask(&self, kind: PromptKind) -> Option<String> {
        clean_answer(self.prompt.ask(&PromptRequest::new(kind)).await)
    }

    /// Session end: flushes unsaved markups without waiting and remembers
    /// the zoom scale.
    pub fn teardown(&mut self) {
        self.debouncer.cancel();
        let save = &self.session.save;
        if save.is_dirty() || matches!(save.status(), SaveStatus::Saving | SaveStatus::Error) {
            self.sync_all();
            let payload = MarkupsPayload::new(self.session.scope(), self.session.markups().to_vec());
            info!(markups = payload.markups.len(), "flushing unsaved markups on teardown");
            self.api.send_beacon(payload);
        }
        self.persist_view_state();
    }

    fn persist_view_state(&self) {
        let state = ViewState {
            scale: self.session.scale(),
        };
        if let Err(err) = self.views.save(self.key, &state) {
            warn!(%err, "failed to persist view state");
        }
    }

    fn page_count(&self) -> Option<usize> {
        self.view.cache().map(PageCache::page_count)
    }

    fn sync_all(&mut self) {
        if let Some(cache) = self.view.cache() {
            cache.sync_all(self.session.markups_mut());
        }
    }

    fn full_snapshot(&mut self) -> Snapshot {
        self.sync_all();
        Snapshot::capture(self.session.markups())
    }

    fn redraw_all(&mut self) {
        if let Some(cache) = self.view.cache_mut() {
            cache.rerender_all(self.session.markups());
        }
    }

    fn redraw_page(&mut self, page: usize) {
        let markups = pagemark_core::markups_on_page(self.session.markups(), page);
        if let Some(backend) = self.view.cache_mut().and_then(|c| c.backend_mut(page)) {
            backend.render_from_model(&markups);
        }
    }

    /// State sync after a backend reported a change on `page`.
    fn commit_change(&mut self, page: usize) {
        if let Some(snapshot) = self.pending_snapshot.take() {
            self.session.history.record(snapshot);
        }
        if let Some(cache) = self.view.cache() {
            cache.sync_page(page, self.session.markups_mut());
        }
        self.mark_dirty();
    }

    fn mark_dirty(&mut self) {
        if self.session.save.mark_dirty() {
            self.debouncer.schedule();
        }
    }
}

fn edit_unrendered(markups: &mut Vec<Markup>, markup_id: &str, action: &EditAction) -> bool {
    let Some(index) = markups.iter().position(|m| m.id == markup_id) else {
        return false;
    };
    match action {
        EditAction::Delete => {
            markups.remove(index);
            true
        }
        _ => edit_markup(&mut markups[index], action),
    }
}

/// Keeps the server records that would survive a save. Without a page
/// count only the page-independent rules apply.
fn drop_invalid(markups: Vec<Markup>, page_count: Option<usize>) -> Vec<Markup> {
    let mut kept: Vec<Markup> = markups
        .into_iter()
        .filter(|markup| match markup.validate(page_count) {
            Ok(()) => true,
            Err(err) => {
                warn!(id = %markup.id, %err, "dropping invalid markup from server");
                false
            }
        })
        .collect();
    if kept.len() > MAX_MARKUPS {
        warn!(count = kept.len(), max = MAX_MARKUPS, "truncating markups from server");
        kept.truncate(MAX_MARKUPS);
    }
    kept
}

async fn fetch_valid_markups(
    api: &dyn PersistenceApi,
    scope: Option<LinkedContext>,
    page_count: Option<usize>,
) -> Vec<Markup> {
    match api.fetch_markups(scope).await {
        Ok(markups) => drop_invalid(markups, page_count),
        Err(err) => {
            warn!(%err, "could not load markups; starting empty");
            Vec::new()
        }
    }
}

async fn open_view(
    api: &dyn PersistenceApi,
    provider: &dyn EngineProvider,
    config: &EditorConfig,
    scale: f64,
) -> DocumentView {
    let bytes = match api.fetch_file().await {
        Ok(bytes) => bytes,
        Err(err) => return fallback(Vec::new(), err.to_string()),
    };
    let engine = match provider.open(bytes.clone()).await {
        Ok(engine) => engine,
        Err(err) => return fallback(bytes, format!("{err:#}")),
    };
    match PageCache::build(engine, scale, config.cache.clone(), config.backend).await {
        Ok(cache) => DocumentView::Interactive(cache),
        Err(err) => fallback(bytes, err.to_string()),
    }
}

fn fallback(bytes: Vec<u8>, reason: String) -> DocumentView {
    warn!(%reason, "rendering unavailable; showing the document read-only");
    DocumentView::Fallback(FallbackView { bytes, reason })
}
