//! Integration tests for keyword campaigns.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use article_harvester::campaign::{
    BatchSettings, BatchThrottle, CampaignRunner, CampaignSummary, DelayRange, Pacing,
    RunnerSettings, Sleeper,
};
use article_harvester::config::Config;
use article_harvester::db::{
    add_article, get_article_by_url, get_task, list_articles, recent_tasks, set_keyword_status,
    stats, Database, KeywordStatus, NewArticle, TaskKind, TaskState,
};
use article_harvester::fetcher::{ArticleFetcher, ExtractedArticle, HttpArticleFetcher};
use article_harvester::http::{build_client, FetchError};
use article_harvester::search::{LinkRules, PortalClient, SearchPage, SearchPortal};
use async_trait::async_trait;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

fn article_url(id: &str) -> String {
    format!("https://mp.weixin.qq.com/s/{id}")
}

fn results_page(ids: &[&str]) -> String {
    let items: String = ids
        .iter()
        .map(|id| format!(r#"<li><h3><a href="{}">Result {id}</a></h3></li>"#, article_url(id)))
        .collect();
    format!(r#"<html><body><ul class="news-list">{items}</ul></body></html>"#)
}

#[derive(Clone)]
enum PageResponse {
    Html(String),
    Challenge,
    Error,
}

/// Portal serving canned pages by page number.
struct FakePortal {
    pages: HashMap<u32, PageResponse>,
    requests: Mutex<Vec<u32>>,
}

impl FakePortal {
    fn new(pages: Vec<(u32, PageResponse)>) -> Self {
        Self {
            pages: pages.into_iter().collect(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requested(&self) -> Vec<u32> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchPortal for FakePortal {
    async fn search_page(&self, keyword: &str, page: u32) -> Result<SearchPage, FetchError> {
        self.requests.lock().unwrap().push(page);
        let url = Url::parse(&format!(
            "https://weixin.sogou.com/weixin?type=2&query={keyword}&page={page}"
        ))
        .unwrap();

        match self.pages.get(&page).cloned() {
            Some(PageResponse::Html(html)) => Ok(SearchPage {
                url,
                body: html.into_bytes(),
            }),
            Some(PageResponse::Challenge) => Ok(SearchPage {
                url: Url::parse("https://weixin.sogou.com/antispider/?from=weixin").unwrap(),
                body: b"<html><body>seccodeImage</body></html>".to_vec(),
            }),
            Some(PageResponse::Error) | None => Err(FetchError::Status {
                url: url.to_string(),
                status: 503,
            }),
        }
    }
}

/// Fetcher that fails for a configured set of URLs.
#[derive(Default)]
struct FakeFetcher {
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeFetcher {
    fn failing(urls: &[String]) -> Self {
        Self {
            failing: urls.iter().cloned().collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArticleFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<ExtractedArticle, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        if self.failing.contains(url) {
            return Err(FetchError::EmptyContent {
                url: url.to_string(),
            });
        }
        Ok(ExtractedArticle {
            title: format!("Title for {url}"),
            author: None,
            body_text: "Some body text".to_string(),
            word_count: 14,
        })
    }
}

/// Records every requested sleep without waiting.
#[derive(Default)]
struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

struct Harness {
    runner: CampaignRunner,
    portal: Arc<FakePortal>,
    fetcher: Arc<FakeFetcher>,
    sleeper: Arc<RecordingSleeper>,
    throttle: Arc<BatchThrottle>,
}

fn harness(
    db: &Database,
    portal: FakePortal,
    fetcher: FakeFetcher,
    search_pages: u32,
    pacing: Pacing,
    batch: BatchSettings,
) -> Harness {
    let portal = Arc::new(portal);
    let fetcher = Arc::new(fetcher);
    let sleeper = Arc::new(RecordingSleeper::default());
    let throttle = Arc::new(BatchThrottle::new(batch));

    let runner = CampaignRunner::new(
        db.clone(),
        portal.clone(),
        fetcher.clone(),
        LinkRules::new("mp.weixin.qq.com", "/s"),
        RunnerSettings {
            search_pages,
            pacing,
        },
        throttle.clone(),
    )
    .with_sleeper(sleeper.clone());

    Harness {
        runner,
        portal,
        fetcher,
        sleeper,
        throttle,
    }
}

#[tokio::test]
async fn test_single_item_failure_does_not_abort_campaign() {
    let (db, _temp_dir) = setup_db().await;
    let portal = FakePortal::new(vec![(
        1,
        PageResponse::Html(results_page(&["one", "two", "three"])),
    )]);
    let fetcher = FakeFetcher::failing(&[article_url("two")]);
    let h = harness(&db, portal, fetcher, 1, Pacing::NONE, BatchSettings::new(100, 5));

    let outcome = h.runner.run("X", 10, TaskKind::Manual).await.unwrap();

    assert_eq!(
        outcome.summary,
        CampaignSummary {
            ingested: 2,
            failed: 1,
            total_candidates: 3,
        }
    );

    let task = get_task(db.pool(), outcome.task_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.state(), Some(TaskState::Completed));
    assert_eq!(task.keyword.as_deref(), Some("X"));
    let summary: CampaignSummary =
        serde_json::from_str(task.result_summary.as_deref().unwrap()).unwrap();
    assert_eq!(summary, outcome.summary);

    // Candidates are fetched in discovery order
    assert_eq!(
        h.fetcher.calls(),
        vec![article_url("one"), article_url("two"), article_url("three")]
    );

    let stored = list_articles(db.pool(), Some(outcome.keyword_id), 10)
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
    assert!(get_article_by_url(db.pool(), &article_url("two"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_candidates_are_capped_and_paging_stops_early() {
    let (db, _temp_dir) = setup_db().await;
    let portal = FakePortal::new(vec![
        (1, PageResponse::Html(results_page(&["a", "b", "c"]))),
        (2, PageResponse::Html(results_page(&["d", "e"]))),
    ]);
    let h = harness(
        &db,
        portal,
        FakeFetcher::default(),
        3,
        Pacing::NONE,
        BatchSettings::new(100, 5),
    );

    let outcome = h.runner.run("cap", 2, TaskKind::Manual).await.unwrap();

    assert_eq!(outcome.summary.total_candidates, 2);
    assert_eq!(outcome.summary.ingested, 2);
    assert_eq!(h.portal.requested(), vec![1]);
    assert_eq!(h.fetcher.calls(), vec![article_url("a"), article_url("b")]);
}

#[tokio::test]
async fn test_already_ingested_urls_are_skipped() {
    let (db, _temp_dir) = setup_db().await;
    add_article(
        db.pool(),
        &NewArticle {
            canonical_url: article_url("old"),
            title: "Old".to_string(),
            author: None,
            body_text: "Old body".to_string(),
            word_count: 8,
        },
        None,
    )
    .await
    .unwrap();

    let portal = FakePortal::new(vec![
        (1, PageResponse::Html(results_page(&["old", "new"]))),
        // Repeats across pages are queued once
        (2, PageResponse::Html(results_page(&["new", "newer"]))),
    ]);
    let h = harness(
        &db,
        portal,
        FakeFetcher::default(),
        2,
        Pacing::NONE,
        BatchSettings::new(100, 5),
    );

    let outcome = h.runner.run("seen", 10, TaskKind::Manual).await.unwrap();

    assert_eq!(outcome.summary.total_candidates, 2);
    assert_eq!(
        h.fetcher.calls(),
        vec![article_url("new"), article_url("newer")]
    );
    assert_eq!(stats(db.pool()).await.unwrap().articles, 3);
}

#[tokio::test]
async fn test_batch_rest_after_exactly_batch_size_successes() {
    let (db, _temp_dir) = setup_db().await;
    let portal = FakePortal::new(vec![(
        1,
        PageResponse::Html(results_page(&["1", "2", "3", "4", "5"])),
    )]);
    let h = harness(
        &db,
        portal,
        FakeFetcher::default(),
        1,
        Pacing::NONE,
        BatchSettings::new(2, 5),
    );

    let outcome = h.runner.run("batch", 10, TaskKind::Manual).await.unwrap();
    assert_eq!(outcome.summary.ingested, 5);

    let rest = Duration::from_secs(5 * 60);
    let rests = h.sleeper.sleeps().iter().filter(|d| **d >= rest).count();
    assert_eq!(rests, 2, "two full batches out of five ingestions");

    // One success left over in the rolling counter
    assert_eq!(h.throttle.progress(), 1);
}

#[tokio::test]
async fn test_rest_happens_before_next_fetch() {
    let (db, _temp_dir) = setup_db().await;
    let portal = FakePortal::new(vec![(
        1,
        PageResponse::Html(results_page(&["1", "2", "3"])),
    )]);
    let pacing = Pacing {
        search_delay: DelayRange::fixed(Duration::from_millis(1)),
        item_delay: DelayRange::fixed(Duration::from_millis(2)),
        challenge_cooldown: Duration::ZERO,
    };
    let h = harness(
        &db,
        portal,
        FakeFetcher::default(),
        1,
        pacing,
        BatchSettings::new(1, 1),
    );

    h.runner.run("order", 10, TaskKind::Manual).await.unwrap();

    let search = Duration::from_millis(1);
    let item = Duration::from_millis(2);
    let rest = Duration::from_secs(60);
    assert_eq!(
        h.sleeper.sleeps(),
        vec![search, rest, item, rest, item, rest]
    );
    assert_eq!(h.throttle.progress(), 0);
}

#[tokio::test]
async fn test_challenge_page_triggers_cooldown_and_is_skipped() {
    let (db, _temp_dir) = setup_db().await;
    let portal = FakePortal::new(vec![
        (1, PageResponse::Challenge),
        (2, PageResponse::Html(results_page(&["after"]))),
    ]);
    let cooldown = Duration::from_secs(120);
    let pacing = Pacing {
        challenge_cooldown: cooldown,
        ..Pacing::NONE
    };
    let h = harness(
        &db,
        portal,
        FakeFetcher::default(),
        2,
        pacing,
        BatchSettings::new(100, 5),
    );

    let outcome = h.runner.run("guarded", 10, TaskKind::Manual).await.unwrap();

    assert_eq!(outcome.challenged_pages, 1);
    assert_eq!(outcome.summary.total_candidates, 1);
    // Not counted as an item failure
    assert_eq!(outcome.summary.failed, 0);
    assert!(h.sleeper.sleeps().contains(&cooldown));
    // The challenged page is not retried
    assert_eq!(h.portal.requested(), vec![1, 2]);
}

#[tokio::test]
async fn test_no_candidates_completes_with_zero_summary() {
    let (db, _temp_dir) = setup_db().await;
    let portal = FakePortal::new(vec![(1, PageResponse::Error)]);
    let h = harness(
        &db,
        portal,
        FakeFetcher::default(),
        1,
        Pacing::NONE,
        BatchSettings::new(100, 5),
    );

    let outcome = h.runner.run("nothing", 5, TaskKind::Manual).await.unwrap();
    assert_eq!(outcome.summary, CampaignSummary::default());

    let task = get_task(db.pool(), outcome.task_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.state(), Some(TaskState::Completed));
}

#[tokio::test]
async fn test_scheduled_run_skips_paused_keyword() {
    let (db, _temp_dir) = setup_db().await;
    let portal = FakePortal::new(vec![(1, PageResponse::Html(results_page(&["p"])))]);
    let h = harness(
        &db,
        portal,
        FakeFetcher::default(),
        1,
        Pacing::NONE,
        BatchSettings::new(100, 5),
    );

    let keyword_id = article_harvester::db::add_keyword(db.pool(), "quiet")
        .await
        .unwrap();
    set_keyword_status(db.pool(), keyword_id, KeywordStatus::Paused)
        .await
        .unwrap();

    let skipped = h.runner.run("quiet", 5, TaskKind::Scheduled).await.unwrap();
    assert!(skipped.skipped);
    assert!(skipped.task_id.is_none());
    assert!(recent_tasks(db.pool(), None, 10).await.unwrap().is_empty());
    assert!(h.portal.requested().is_empty());

    // Manual runs ignore the pause
    let manual = h.runner.run("quiet", 5, TaskKind::Manual).await.unwrap();
    assert!(!manual.skipped);
    assert_eq!(manual.summary.ingested, 1);
}

#[tokio::test]
async fn test_portal_client_against_mock_server() {
    let mock_server = MockServer::start().await;
    let page = format!(
        r#"<html><body><ul class="news-list">
            <li><a href="/link?url={}">Wrapped</a></li>
            <li><a href="{}">Direct</a></li>
        </ul></body></html>"#,
        urlencoding::encode(&article_url("wrapped?scene=1")),
        article_url("direct"),
    );

    Mock::given(method("GET"))
        .and(path("/weixin"))
        .and(query_param("query", "rust"))
        .and(query_param("type", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .mount(&mock_server)
        .await;

    let (db, _temp_dir) = setup_db().await;
    let config = Config {
        portal_search_url: format!("{}/weixin", mock_server.uri()),
        ..Config::for_testing()
    };
    let client = build_client(config.request_timeout).unwrap();
    let portal = Arc::new(PortalClient::new(
        client,
        Url::parse(&config.portal_search_url).unwrap(),
    ));
    let fetcher = Arc::new(FakeFetcher::default());

    let runner = CampaignRunner::new(
        db.clone(),
        portal,
        fetcher.clone(),
        config.link_rules(),
        config.runner_settings(),
        Arc::new(BatchThrottle::new(config.batch_settings())),
    );

    let outcome = runner.run("rust", 5, TaskKind::Manual).await.unwrap();

    assert_eq!(outcome.summary.ingested, 2);
    // Direct links are discovered before decoded redirects
    assert_eq!(
        fetcher.calls(),
        vec![article_url("direct"), article_url("wrapped")]
    );
}

#[tokio::test]
async fn test_http_article_fetcher_against_mock_server() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/s/good"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body>
                <h1 id="activity-name">Mock title</h1>
                <div id="js_content"><p>Mock body</p></div>
            </body></html>"#,
        ))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/s/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let client = build_client(Duration::from_secs(5)).unwrap();
    let fetcher = HttpArticleFetcher::new(client);

    let article = fetcher
        .fetch(&format!("{}/s/good", mock_server.uri()))
        .await
        .unwrap();
    assert_eq!(article.title, "Mock title");
    assert_eq!(article.body_text, "Mock body");
    assert!(article.author.is_none());

    let err = fetcher
        .fetch(&format!("{}/s/gone", mock_server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 404, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_portal_redirect_to_verification_page_is_a_challenge() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/weixin"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", "/antispider/?from=%2Fweixin"),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/antispider/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>verify</html>"))
        .mount(&mock_server)
        .await;

    let client = build_client(Duration::from_secs(5)).unwrap();
    let portal = PortalClient::new(
        client,
        Url::parse(&format!("{}/weixin", mock_server.uri())).unwrap(),
    );

    let err = portal.search_page("rust", 1).await.unwrap_err();
    assert!(matches!(err, FetchError::Challenge { .. }));

    let (db, _temp_dir) = setup_db().await;
    let sleeper = Arc::new(RecordingSleeper::default());
    let cooldown = Duration::from_secs(120);
    let runner = CampaignRunner::new(
        db.clone(),
        Arc::new(portal),
        Arc::new(FakeFetcher::default()),
        LinkRules::new("mp.weixin.qq.com", "/s"),
        RunnerSettings {
            search_pages: 1,
            pacing: Pacing {
                challenge_cooldown: cooldown,
                ..Pacing::NONE
            },
        },
        Arc::new(BatchThrottle::new(BatchSettings::new(100, 5))),
    )
    .with_sleeper(sleeper.clone());

    let outcome = runner.run("rust", 5, TaskKind::Manual).await.unwrap();
    assert_eq!(outcome.challenged_pages, 1);
    assert_eq!(outcome.summary, CampaignSummary::default());
    assert!(sleeper.sleeps().contains(&cooldown));
}

#[tokio::test]
async fn test_aborted_campaign_marks_task_failed() {
    let (db, _temp_dir) = setup_db().await;
    let portal = FakePortal::new(vec![(1, PageResponse::Html(results_page(&["one"])))]);
    let h = harness(
        &db,
        portal,
        FakeFetcher::default(),
        1,
        Pacing::NONE,
        BatchSettings::new(100, 5),
    );

    // Loading the already-ingested URLs fails without the articles table
    sqlx::query("DROP TABLE articles")
        .execute(db.pool())
        .await
        .unwrap();

    let err = h.runner.run("broken", 5, TaskKind::Manual).await.unwrap_err();
    assert!(format!("{err:#}").contains("already-ingested"));

    let tasks = recent_tasks(db.pool(), None, 10).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].state(), Some(TaskState::Failed));
    assert!(tasks[0].completed_at.is_some());
    let error = tasks[0].error.as_deref().unwrap();
    assert!(error.contains("already-ingested"), "error was {error}");

    assert!(h.portal.requested().is_empty());
    assert!(h.fetcher.calls().is_empty());
}

#[tokio::test]
async fn test_rejected_completion_marks_task_failed() {
    let (db, _temp_dir) = setup_db().await;
    let portal = FakePortal::new(vec![(1, PageResponse::Html(results_page(&["one"])))]);
    let h = harness(
        &db,
        portal,
        FakeFetcher::default(),
        1,
        Pacing::NONE,
        BatchSettings::new(100, 5),
    );

    sqlx::query(
        r"
        CREATE TRIGGER reject_completion BEFORE UPDATE OF state ON tasks
        WHEN NEW.state = 'completed'
        BEGIN
            SELECT RAISE(ABORT, 'completion rejected');
        END
        ",
    )
    .execute(db.pool())
    .await
    .unwrap();

    let err = h.runner.run("X", 5, TaskKind::Manual).await.unwrap_err();
    assert!(format!("{err:#}").contains("completion rejected"));

    let tasks = recent_tasks(db.pool(), None, 10).await.unwrap();
    assert_eq!(tasks[0].state(), Some(TaskState::Failed));
    assert!(tasks[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("completion rejected")));

    // The article itself was stored before completion was attempted
    assert!(get_article_by_url(db.pool(), &article_url("one"))
        .await
        .unwrap()
        .is_some());
}
