//! Обработчики команд без привязки к Telegram: решают, что ответить, и
//! отдают ответ через [`ReplySink`]. Ошибки TMDb/хранилища сюда не протекают:
//! каждая превращается в фиксированный текст.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::storage::{Interaction, Statistics, UsageStore};
use crate::tmdb::TmdbClient;

pub const MENU_TEXT: &str = "🎥 <b>Movie/Series Poster Bot</b>\nSend me a name or use buttons:";
pub const NOT_FOUND_TEXT: &str = "❌ No results found";
pub const FETCH_ERROR_TEXT: &str = "⚠️ Error fetching data";
pub const TRENDING_ERROR_TEXT: &str = "⚠️ Trending fetch failed";
pub const PERMISSION_DENIED_TEXT: &str = "⛔ You don't have permission for this command.";
pub const STORE_ERROR_TEXT: &str = "⚠️ Service temporarily unavailable, try again later.";

/// Данные inline-кнопок стартового меню.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuButton {
    Movies,
    Series,
    Trending,
}

impl MenuButton {
    pub const ALL: [MenuButton; 3] = [MenuButton::Movies, MenuButton::Series, MenuButton::Trending];

    pub fn data(self) -> &'static str {
        match self {
            MenuButton::Movies => "movies",
            MenuButton::Series => "series",
            MenuButton::Trending => "trending",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MenuButton::Movies => "🎬 Movies",
            MenuButton::Series => "📺 Series",
            MenuButton::Trending => "🔥 Trending",
        }
    }

    pub fn parse(data: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.data() == data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Html(String),
    /// HTML-текст со стартовой клавиатурой.
    Menu(String),
    Photo(String),
    /// Заменить текст сообщения, к которому привязана нажатая кнопка.
    EditText(String),
}

/// Куда уходят ответы. В проде — Telegram, в тестах — запись в вектор.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn deliver(&self, reply: Reply) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct Handlers {
    store: UsageStore,
    tmdb: TmdbClient,
    admin_id: i64,
}

impl Handlers {
    pub fn new(store: UsageStore, tmdb: TmdbClient, admin_id: i64) -> Self {
        Self { store, tmdb, admin_id }
    }

    /// /start: учёт пользователя/чата и меню.
    pub async fn on_start(&self, sink: &dyn ReplySink, interaction: Option<&Interaction>) -> anyhow::Result<()> {
        if let Some(i) = interaction {
            if let Err(e) = self.store.record_interaction(i).await {
                error!(user_id = i.user_id, error = %e, "failed to record interaction");
                return sink.deliver(Reply::Text(STORE_ERROR_TEXT.to_string())).await;
            }
            info!(user_id = i.user_id, chat_id = i.chat_id, "start");
        }
        sink.deliver(Reply::Menu(MENU_TEXT.to_string())).await
    }

    /// Нажатие кнопки. Сам callback подтверждает транспорт.
    pub async fn on_button(&self, sink: &dyn ReplySink, data: &str) -> anyhow::Result<()> {
        match MenuButton::parse(data) {
            Some(MenuButton::Movies) => {
                sink.deliver(Reply::EditText(prompt_text("movie"))).await
            }
            Some(MenuButton::Series) => {
                sink.deliver(Reply::EditText(prompt_text("series"))).await
            }
            Some(MenuButton::Trending) => self.send_trending(sink).await,
            None => {
                warn!(data, "unknown callback data");
                Ok(())
            }
        }
    }

    async fn send_trending(&self, sink: &dyn ReplySink) -> anyhow::Result<()> {
        match self.tmdb.trending_image().await {
            Ok(Some(url)) => {
                if let Err(e) = sink.deliver(Reply::Photo(url)).await {
                    warn!(error = %e, "failed to deliver trending image");
                    return sink.deliver(Reply::Text(TRENDING_ERROR_TEXT.to_string())).await;
                }
                Ok(())
            }
            Ok(None) => sink.deliver(Reply::Text(NOT_FOUND_TEXT.to_string())).await,
            Err(e) => {
                error!(error = %e, "trending fetch failed");
                sink.deliver(Reply::Text(TRENDING_ERROR_TEXT.to_string())).await
            }
        }
    }

    /// Свободный текст → поиск → картинка. Счётчик растёт только после успешной отправки.
    pub async fn on_text(&self, sink: &dyn ReplySink, user_id: i64, query: &str) -> anyhow::Result<()> {
        // запрос уходит в TMDb как есть; на пустой всё равно отвечаем
        if query.trim().is_empty() {
            info!(user_id, "empty query");
            return sink.deliver(Reply::Text(NOT_FOUND_TEXT.to_string())).await;
        }

        let url = match self.tmdb.search_image(query).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                info!(user_id, query, "nothing found");
                return sink.deliver(Reply::Text(NOT_FOUND_TEXT.to_string())).await;
            }
            Err(e) => {
                error!(user_id, query, error = %e, "search failed");
                return sink.deliver(Reply::Text(FETCH_ERROR_TEXT.to_string())).await;
            }
        };

        if let Err(e) = sink.deliver(Reply::Photo(url)).await {
            warn!(user_id, error = %e, "failed to deliver image");
            return sink.deliver(Reply::Text(FETCH_ERROR_TEXT.to_string())).await;
        }

        // картинка уже у пользователя, ошибку счётчика только логируем
        if let Err(e) = self.store.increment_request_count(user_id).await {
            error!(user_id, error = %e, "failed to increment request count");
        }
        Ok(())
    }

    /// /stats, только для админа.
    pub async fn on_stats(&self, sink: &dyn ReplySink, caller_id: Option<i64>) -> anyhow::Result<()> {
        if caller_id != Some(self.admin_id) {
            warn!(?caller_id, "stats requested by non-admin");
            return sink.deliver(Reply::Text(PERMISSION_DENIED_TEXT.to_string())).await;
        }
        match self.store.statistics().await {
            Ok(stats) => sink.deliver(Reply::Html(render_stats(&stats))).await,
            Err(e) => {
                error!(error = %e, "failed to load statistics");
                sink.deliver(Reply::Text(STORE_ERROR_TEXT.to_string())).await
            }
        }
    }
}

fn prompt_text(what: &str) -> String {
    format!("Send me a {what} name (e.g.: 'Inception' or 'Breaking Bad')")
}

pub fn render_stats(s: &Statistics) -> String {
    format!(
        "📊 <b>Bot Statistics</b>\n\n\
         👤 Total Users: {}\n\
         👥 Total Groups: {}\n\
         📨 Total Requests: {}\n\
         📅 Last 24h Active: {}\n\n\
         ⏱ Last updated: {}",
        s.total_users,
        s.total_groups,
        s.total_requests,
        s.active_last_24h,
        s.timestamp.format("%Y-%m-%d %H:%M:%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ChatKind;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tokio::sync::Mutex;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ADMIN: i64 = 1000;

    #[derive(Default)]
    struct RecordingSink {
        replies: Mutex<Vec<Reply>>,
        reject_photos: bool,
    }

    impl RecordingSink {
        async fn replies(&self) -> Vec<Reply> {
            self.replies.lock().await.clone()
        }
    }

    #[async_trait]
    impl ReplySink for RecordingSink {
        async fn deliver(&self, reply: Reply) -> anyhow::Result<()> {
            if self.reject_photos && matches!(reply, Reply::Photo(_)) {
                anyhow::bail!("wrong file identifier/HTTP URL specified");
            }
            self.replies.lock().await.push(reply);
            Ok(())
        }
    }

    async fn setup(server: &MockServer) -> (Handlers, UsageStore) {
        let store = UsageStore::connect("sqlite::memory:").await.unwrap();
        let tmdb = TmdbClient::new("key".into(), server.uri(), "https://img.test/w1280".into());
        (Handlers::new(store.clone(), tmdb, ADMIN), store)
    }

    async fn mount_search(server: &MockServer, endpoint: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn request_count(store: &UsageStore, user_id: i64) -> i64 {
        store.get_user(user_id).await.unwrap().unwrap().request_count
    }

    #[tokio::test]
    async fn start_in_private_chat_creates_user_only() {
        let server = MockServer::start().await;
        let (h, store) = setup(&server).await;
        let sink = RecordingSink::default();

        h.on_start(&sink, Some(&Interaction::private(42, "neo"))).await.unwrap();

        assert_eq!(sink.replies().await, vec![Reply::Menu(MENU_TEXT.to_string())]);
        assert_eq!(request_count(&store, 42).await, 0);
        let s = store.statistics().await.unwrap();
        assert_eq!((s.total_users, s.total_groups), (1, 0));
    }

    #[tokio::test]
    async fn start_in_group_records_group() {
        let server = MockServer::start().await;
        let (h, store) = setup(&server).await;
        let sink = RecordingSink::default();
        let i = Interaction::in_chat(42, "neo", -500, ChatKind::Supergroup, Some("Cinema".into()));

        h.on_start(&sink, Some(&i)).await.unwrap();

        let g = store.get_group(-500).await.unwrap().unwrap();
        assert_eq!(g.title.as_deref(), Some("Cinema"));
        assert_eq!(g.chat_type, ChatKind::Supergroup);
    }

    #[tokio::test]
    async fn successful_search_sends_image_and_counts_request() {
        let server = MockServer::start().await;
        mount_search(&server, "/search/tv", json!({ "results": [ { "backdrop_path": "/inception.jpg" } ] })).await;
        let (h, store) = setup(&server).await;
        let sink = RecordingSink::default();

        h.on_start(&sink, Some(&Interaction::private(42, "neo"))).await.unwrap();
        h.on_text(&sink, 42, "Inception").await.unwrap();

        let replies = sink.replies().await;
        assert_eq!(replies.last(), Some(&Reply::Photo("https://img.test/w1280/inception.jpg".into())));
        assert_eq!(request_count(&store, 42).await, 1);
    }

    #[tokio::test]
    async fn empty_search_replies_not_found_and_keeps_count() {
        let server = MockServer::start().await;
        mount_search(&server, "/search/tv", json!({ "results": [] })).await;
        let (h, store) = setup(&server).await;
        let sink = RecordingSink::default();

        h.on_start(&sink, Some(&Interaction::private(42, "neo"))).await.unwrap();
        h.on_text(&sink, 42, "zzzzznotreal").await.unwrap();

        assert_eq!(sink.replies().await.last(), Some(&Reply::Text(NOT_FOUND_TEXT.into())));
        assert_eq!(request_count(&store, 42).await, 0);
    }

    #[tokio::test]
    async fn api_failure_replies_error_and_keeps_count() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let (h, store) = setup(&server).await;
        let sink = RecordingSink::default();

        h.on_start(&sink, Some(&Interaction::private(42, "neo"))).await.unwrap();
        h.on_text(&sink, 42, "Inception").await.unwrap();

        assert_eq!(sink.replies().await.last(), Some(&Reply::Text(FETCH_ERROR_TEXT.into())));
        assert_eq!(request_count(&store, 42).await, 0);
    }

    #[tokio::test]
    async fn undeliverable_image_is_not_counted() {
        let server = MockServer::start().await;
        mount_search(&server, "/search/movie", json!({ "results": [ { "poster_path": "/x.jpg" } ] })).await;
        let (h, store) = setup(&server).await;
        let sink = RecordingSink { reject_photos: true, ..Default::default() };

        h.on_start(&sink, Some(&Interaction::private(42, "neo"))).await.unwrap();
        h.on_text(&sink, 42, "some movie").await.unwrap();

        assert_eq!(sink.replies().await.last(), Some(&Reply::Text(FETCH_ERROR_TEXT.into())));
        assert_eq!(request_count(&store, 42).await, 0);
    }

    #[tokio::test]
    async fn blank_text_replies_not_found_without_searching() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
            .expect(0)
            .mount(&server)
            .await;
        let (h, _store) = setup(&server).await;
        let sink = RecordingSink::default();

        h.on_text(&sink, 42, "   ").await.unwrap();
        assert_eq!(sink.replies().await, vec![Reply::Text(NOT_FOUND_TEXT.into())]);
    }

    #[tokio::test]
    async fn query_is_sent_to_tmdb_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/tv"))
            .and(query_param("query", " Inception "))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [ { "backdrop_path": "/inception.jpg" } ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        let (h, store) = setup(&server).await;
        let sink = RecordingSink::default();

        h.on_start(&sink, Some(&Interaction::private(42, "neo"))).await.unwrap();
        h.on_text(&sink, 42, " Inception ").await.unwrap();

        assert_eq!(sink.replies().await.last(), Some(&Reply::Photo("https://img.test/w1280/inception.jpg".into())));
        assert_eq!(request_count(&store, 42).await, 1);
    }

    #[tokio::test]
    async fn non_admin_gets_permission_denied_without_touching_store() {
        let server = MockServer::start().await;
        let (h, store) = setup(&server).await;
        let sink = RecordingSink::default();
        // закрытое хранилище: любое обращение дало бы STORE_ERROR_TEXT
        store.close().await;

        h.on_stats(&sink, Some(42)).await.unwrap();
        h.on_stats(&sink, None).await.unwrap();

        assert_eq!(
            sink.replies().await,
            vec![Reply::Text(PERMISSION_DENIED_TEXT.into()), Reply::Text(PERMISSION_DENIED_TEXT.into())]
        );
    }

    #[tokio::test]
    async fn admin_gets_statistics_summary() {
        let server = MockServer::start().await;
        let (h, store) = setup(&server).await;
        let sink = RecordingSink::default();
        store.record_interaction(&Interaction::private(1, "a")).await.unwrap();
        store.increment_request_count(1).await.unwrap();

        h.on_stats(&sink, Some(ADMIN)).await.unwrap();

        let replies = sink.replies().await;
        let [Reply::Html(text)] = replies.as_slice() else {
            panic!("unexpected replies: {replies:?}");
        };
        assert!(text.starts_with("📊 <b>Bot Statistics</b>"));
        assert!(text.contains("👤 Total Users: 1\n"));
        assert!(text.contains("👥 Total Groups: 0\n"));
        assert!(text.contains("📨 Total Requests: 1\n"));
        assert!(text.contains("📅 Last 24h Active: 1\n"));
    }

    #[tokio::test]
    async fn store_failure_on_stats_replies_fixed_text() {
        let server = MockServer::start().await;
        let (h, store) = setup(&server).await;
        let sink = RecordingSink::default();
        store.close().await;

        h.on_stats(&sink, Some(ADMIN)).await.unwrap();
        assert_eq!(sink.replies().await, vec![Reply::Text(STORE_ERROR_TEXT.into())]);
    }

    #[tokio::test]
    async fn buttons_prompt_or_send_trending() {
        let server = MockServer::start().await;
        mount_search(&server, "/trending/all/day", json!({ "results": [ { "backdrop_path": "/t.jpg" } ] })).await;
        let (h, _store) = setup(&server).await;
        let sink = RecordingSink::default();

        h.on_button(&sink, "movies").await.unwrap();
        h.on_button(&sink, "series").await.unwrap();
        h.on_button(&sink, "trending").await.unwrap();
        h.on_button(&sink, "bogus").await.unwrap();

        assert_eq!(
            sink.replies().await,
            vec![
                Reply::EditText("Send me a movie name (e.g.: 'Inception' or 'Breaking Bad')".into()),
                Reply::EditText("Send me a series name (e.g.: 'Inception' or 'Breaking Bad')".into()),
                Reply::Photo("https://img.test/w1280/t.jpg".into()),
            ]
        );
    }

    #[tokio::test]
    async fn trending_failure_replies_fixed_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let (h, _store) = setup(&server).await;
        let sink = RecordingSink::default();

        h.on_button(&sink, "trending").await.unwrap();
        assert_eq!(sink.replies().await, vec![Reply::Text(TRENDING_ERROR_TEXT.into())]);
    }

    #[test]
    fn stats_render_matches_fixed_layout() {
        let s = Statistics {
            total_users: 3,
            total_groups: 1,
            total_requests: 12,
            active_last_24h: 2,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 5).unwrap(),
        };
        assert_eq!(
            render_stats(&s),
            "📊 <b>Bot Statistics</b>\n\n👤 Total Users: 3\n👥 Total Groups: 1\n📨 Total Requests: 12\n📅 Last 24h Active: 2\n\n⏱ Last updated: 2024-05-01 09:30:05"
        );
    }

    #[test]
    fn menu_buttons_round_trip_callback_data() {
        for b in MenuButton::ALL {
            assert_eq!(MenuButton::parse(b.data()), Some(b));
        }
        assert_eq!(MenuButton::parse("add:1"), None);
    }
}
