//! Integration tests for gqlbind_sdk

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use gqlbind_sdk::{
    operation, BatchResult, BatchResults, Client, ClientConfig, ErrorCode, ExecuteOptions,
    FetchPolicy, GraphQLError, LocalResolvers, NoVariables, Request, Response, SdkResult,
    Transport,
};
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;

const FRAGMENTS: &str = r#"
fragment DocumentBasicInfo on Document {
  __typename
  id
  title
}

fragment DocumentContents on Document {
  ciphertext
  plaintext @client
}

fragment DocumentSecret on Document {
  secret @client
}

fragment DocumentFullInfo on Document {
  ...DocumentBasicInfo
  ...DocumentContents
  parent {
    ...DocumentBasicInfo
  }
}
"#;

#[derive(Debug, Clone, Serialize)]
struct IdVariables {
    id: String,
}

#[derive(Debug, Clone, Serialize)]
struct PreviewVariables {
    id: String,
    locale: String,
}

#[derive(Debug, Clone, Serialize)]
struct CreateDocumentsVariables {
    titles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Document {
    id: String,
    title: String,
    ciphertext: Option<String>,
    plaintext: Option<String>,
    parent: Option<Box<Document>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct GetDocumentFullData {
    document: Option<Document>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Preview {
    id: String,
    title: String,
    secret: Option<String>,
    summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct GetDocumentPreviewData {
    document: Option<Preview>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Created {
    document: CreatedDocument,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct CreatedDocument {
    id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDocumentsData {
    create_documents: Vec<BatchResult<Created>>,
}

operation! {
    GetDocumentFull: Query(IdVariables) -> GetDocumentFullData = r#"
        query GetDocumentFull($id: String!) {
          document(id: $id) {
            ...DocumentBasicInfo
            ...DocumentFullInfo
          }
        }
    "#;

    GetDocumentPreview: Query(PreviewVariables) -> GetDocumentPreviewData = r#"
        query GetDocumentPreview($id: String!, $locale: String!) {
          document(id: $id) {
            ...DocumentBasicInfo
            ...DocumentSecret
            summary(locale: $locale) @client
          }
        }
    "#;

    CreateDocuments: Mutation(CreateDocumentsVariables) -> CreateDocumentsData = r#"
        mutation CreateDocuments($titles: [String!]!) {
          createDocuments(titles: $titles) {
            __typename
            ... on CreateDocumentSuccess {
              document { id }
            }
            ... on BatchError {
              message
              code
              extensions
            }
          }
        }
    "#;
}

/// Answers every request with the same body and records requests.
#[derive(Clone)]
struct StaticTransport {
    response: Response,
    sent: Arc<Mutex<Vec<Request>>>,
    delay: Duration,
}

impl StaticTransport {
    fn new(response: Response) -> Self {
        Self {
            response,
            sent: Arc::default(),
            delay: Duration::ZERO,
        }
    }

    fn sent(&self) -> Vec<Request> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for StaticTransport {
    async fn send(&self, request: &Request) -> SdkResult<Response> {
        self.sent.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.response.clone())
    }
}

fn document_response() -> Response {
    Response::data(json!({
        "document": {
            "__typename": "Document",
            "id": "d2",
            "title": "Q3 plan",
            "ciphertext": "nalp",
            "parent": { "__typename": "Document", "id": "d1", "title": "Plans" }
        }
    }))
}

fn reverse_ciphertext() -> LocalResolvers {
    LocalResolvers::new()
        .field("Document", "plaintext", |ctx| {
            let ciphertext = ctx
                .parent
                .get("ciphertext")
                .and_then(|v| v.as_str())
                .ok_or("ciphertext not loaded")?;
            Ok(json!(ciphertext.chars().rev().collect::<String>()))
        })
        .field("Document", "secret", |ctx| {
            let id = ctx.parent.get("id").and_then(|v| v.as_str()).ok_or("id not loaded")?;
            Ok(json!(format!("secret of {id}")))
        })
        .field("Document", "summary", |ctx| {
            let locale = ctx.arguments.get("locale").and_then(|v| v.as_str()).unwrap_or("en");
            let title = ctx.parent.get("title").and_then(|v| v.as_str()).unwrap_or_default();
            Ok(json!(format!("[{locale}] {title}")))
        })
}

fn build_client(transport: StaticTransport) -> Client {
    Client::builder(ClientConfig::new("http://unused"))
        .fragments(FRAGMENTS)
        .operation::<GetDocumentFull>()
        .operation::<GetDocumentPreview>()
        .operation::<CreateDocuments>()
        .local_resolvers(reverse_ciphertext())
        .transport(transport)
        .build()
        .expect("valid client")
}

#[tokio::test]
async fn test_wire_document_composes_fragments_once_and_strips_local_fields() {
    let transport = StaticTransport::new(document_response());
    let client = build_client(transport.clone());

    let data = client
        .execute_ok::<GetDocumentFull>(IdVariables { id: "d2".into() }, &ExecuteOptions::default())
        .await
        .unwrap();

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    let query = &sent[0].query;
    assert_eq!(query.matches("fragment DocumentBasicInfo on Document").count(), 1);
    assert!(!query.contains("plaintext"));
    assert!(!query.contains("@client"));
    assert_eq!(sent[0].variables, Some(json!({ "id": "d2" })));

    let document = data.document.expect("document");
    assert_eq!(document.plaintext.as_deref(), Some("plan"));
    assert_eq!(document.ciphertext.as_deref(), Some("nalp"));
    // The parent selects no contents, so nothing is resolved there.
    assert_eq!(document.parent.expect("parent").plaintext, None);
}

#[tokio::test]
async fn test_local_only_fragment_and_variable_stay_off_the_wire() {
    let transport = StaticTransport::new(Response::data(json!({
        "document": { "__typename": "Document", "id": "d2", "title": "Q3 plan" }
    })));
    let client = build_client(transport.clone());

    let data = client
        .execute_ok::<GetDocumentPreview>(
            PreviewVariables { id: "d2".into(), locale: "fr".into() },
            &ExecuteOptions::default(),
        )
        .await
        .unwrap();

    let sent = transport.sent();
    assert!(!sent[0].query.contains("DocumentSecret"));
    assert!(!sent[0].query.contains("$locale"));
    assert_eq!(sent[0].variables, Some(json!({ "id": "d2" })));

    let document = data.document.expect("document");
    assert_eq!(document.id, "d2");
    assert_eq!(document.secret.as_deref(), Some("secret of d2"));
    assert_eq!(document.summary.as_deref(), Some("[fr] Q3 plan"));
}

#[tokio::test]
async fn test_errored_response_is_refetched_under_cache_first() {
    let transport = StaticTransport::new(Response {
        data: Some(json!({
            "document": {
                "__typename": "Document",
                "id": "d2",
                "title": "Q3 plan",
                "ciphertext": null,
                "parent": null
            }
        })),
        errors: vec![GraphQLError::new("ciphertext unavailable")],
    });
    let client = build_client(transport.clone());
    let variables = || IdVariables { id: "d2".into() };

    for _ in 0..2 {
        let err = client
            .execute::<GetDocumentFull>(variables(), &ExecuteOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ExecutionError);
    }
    assert_eq!(transport.sent().len(), 2);

    let miss = client
        .execute::<GetDocumentFull>(variables(), &ExecuteOptions::new().fetch_policy(FetchPolicy::CacheOnly))
        .await
        .unwrap_err();
    assert_eq!(miss.code, ErrorCode::CacheMiss);
}

#[tokio::test]
async fn test_partial_batch_keeps_per_item_results() {
    let transport = StaticTransport::new(Response::data(json!({
        "createDocuments": [
            { "__typename": "CreateDocumentSuccess", "document": { "id": "d1" } },
            {
                "__typename": "BatchError",
                "message": "Title already taken",
                "code": "CONFLICT",
                "extensions": { "index": 1 }
            },
            { "__typename": "CreateDocumentSuccess", "document": { "id": "d3" } }
        ]
    })));
    let client = build_client(transport);

    let titles = ["a", "b", "c"].map(String::from).to_vec();
    let data = client
        .execute_ok::<CreateDocuments>(CreateDocumentsVariables { titles }, &ExecuteOptions::default())
        .await
        .expect("a failed item does not fail the batch");

    let items = &data.create_documents;
    assert_eq!(items.len(), 3);
    assert!(matches!(&items[0], BatchResult::Success(created) if created.document.id == "d1"));
    assert!(matches!(&items[1], BatchResult::Error(error) if error.code.as_deref() == Some("CONFLICT")));
    assert!(matches!(&items[2], BatchResult::Success(created) if created.document.id == "d3"));

    let succeeded: Vec<usize> = items.successes().into_iter().map(|(i, _)| i).collect();
    assert_eq!(succeeded, vec![0, 2]);
    assert_eq!(items.errors()[0].1.message, "Title already taken");
}

#[tokio::test]
async fn test_watch_publishes_loading_then_data() {
    let mut transport = StaticTransport::new(document_response());
    transport.delay = Duration::from_millis(20);
    let client = build_client(transport);

    let mut handle = client
        .watch::<GetDocumentFull>(IdVariables { id: "d2".into() }, ExecuteOptions::default())
        .unwrap();
    assert!(handle.state().loading);

    let state = handle.settled().await;
    assert!(!state.loading);
    assert!(state.error.is_none());
    assert_eq!(state.data.unwrap().document.unwrap().title, "Q3 plan");
}

#[tokio::test]
async fn test_watch_with_skip_never_executes() {
    let transport = StaticTransport::new(document_response());
    let client = build_client(transport.clone());

    let handle = client
        .watch::<GetDocumentFull>(
            IdVariables { id: "d2".into() },
            ExecuteOptions::new().skip(true),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let state = handle.state();
    assert!(!state.loading);
    assert!(state.data.is_none());
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_polling_refetches_until_dropped() {
    let transport = StaticTransport::new(document_response());
    let client = build_client(transport.clone());
    let options = ExecuteOptions::new()
        .poll_interval(Duration::from_millis(10))
        .fetch_policy(FetchPolicy::NetworkOnly);

    let handle = client
        .watch::<GetDocumentFull>(IdVariables { id: "d2".into() }, options)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(55)).await;
    drop(handle);

    let polled = transport.sent().len();
    assert!(polled >= 3, "polled {polled} times");

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(transport.sent().len(), polled);
}

#[tokio::test]
async fn test_stop_polling_settles_request_in_flight() {
    let mut transport = StaticTransport::new(document_response());
    transport.delay = Duration::from_millis(40);
    let client = build_client(transport.clone());
    let options = ExecuteOptions::new()
        .poll_interval(Duration::from_millis(10))
        .fetch_policy(FetchPolicy::NetworkOnly);

    let mut handle = client
        .watch::<GetDocumentFull>(IdVariables { id: "d2".into() }, options)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(15)).await;
    assert!(handle.state().loading);

    handle.stop_polling();
    let state = tokio::time::timeout(Duration::from_secs(1), handle.settled())
        .await
        .expect("settles once the request completes");
    assert!(!state.loading);
    assert_eq!(state.data.unwrap().document.unwrap().title, "Q3 plan");

    let polled = transport.sent().len();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(transport.sent().len(), polled);
}

#[tokio::test]
async fn test_lazy_query_runs_only_when_triggered() {
    let transport = StaticTransport::new(document_response());
    let client = build_client(transport.clone());

    let lazy = client.lazy::<GetDocumentFull>(ExecuteOptions::default());
    assert!(!lazy.called());
    assert!(lazy.refetch().await.is_none());
    assert!(transport.sent().is_empty());

    let response = lazy.trigger(IdVariables { id: "d2".into() }).await.unwrap();
    assert!(response.data.is_some());
    assert!(lazy.called());

    let state = lazy.state();
    assert!(!state.loading);
    assert_eq!(state.data, response.data);
}

#[tokio::test]
async fn test_mutation_surfaces_server_errors_in_state() {
    let transport = StaticTransport::new(Response::errors(vec![GraphQLError::new(
        "Not authorized",
    )]));
    let client = build_client(transport.clone());

    let mutation = client.mutation::<CreateDocuments>(ExecuteOptions::default());
    let err = mutation
        .mutate(CreateDocumentsVariables { titles: vec!["a".into()] })
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::ExecutionError);
    let state = mutation.state();
    assert_eq!(state.error, Some(err));
    assert!(state.data.is_none());
    // Server errors are not retried.
    assert_eq!(transport.sent().len(), 1);

    mutation.reset();
    assert!(mutation.state().error.is_none());
}

async fn serve_once(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| async move {
            let request: Request =
                serde_json::from_slice(&req.into_body().collect().await.unwrap().to_bytes())
                    .unwrap();
            assert_eq!(request.operation_name.as_deref(), Some("GetDocumentFull"));
            assert!(!request.query.contains("plaintext"));

            Ok::<_, Infallible>(
                hyper::Response::builder()
                    .header("Content-Type", "application/json")
                    .body(Full::new(Bytes::from_static(body.as_bytes())))
                    .unwrap(),
            )
        });
        let _ = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .await;
    });

    addr
}

#[tokio::test]
async fn test_http_transport_round_trip() {
    let addr = serve_once(
        r#"{"data":{"document":{"__typename":"Document","id":"d2","title":"Q3 plan","ciphertext":"nalp","parent":null}}}"#,
    )
    .await;

    let client = Client::builder(
        ClientConfig::new(format!("http://{addr}/graphql")).header("Authorization", "Bearer t"),
    )
    .fragments(FRAGMENTS)
    .operation::<GetDocumentFull>()
    .operation::<CreateDocuments>()
    .local_resolvers(reverse_ciphertext())
    .build()
    .unwrap();

    let data = client
        .execute_ok::<GetDocumentFull>(IdVariables { id: "d2".into() }, &ExecuteOptions::default())
        .await
        .unwrap();

    let document = data.document.unwrap();
    assert_eq!(document.title, "Q3 plan");
    assert_eq!(document.plaintext.as_deref(), Some("plan"));
    assert!(document.parent.is_none());

    let _ = NoVariables;
}
