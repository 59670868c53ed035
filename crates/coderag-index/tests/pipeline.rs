use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use coderag_index::context::NO_GROUNDING_NOTICE;
use coderag_index::{
    CodeAssistant, CodeIndexer, CodeRetriever, CodeStore, ContextConfig, Dependency, IndexError,
    IndexerConfig, Query, RerankConfig, Reranker, RetrievalConfig,
};
use coderag_llm::mock::MockProvider;
use coderag_llm::{Message, Role};
use coderag_store::InMemoryVectorStore;

const COLLECTION: &str = "chunks";

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn embedder() -> Arc<MockProvider> {
    Arc::new(MockProvider::default().with_hashed_embeddings(64))
}

fn retrieval_config() -> RetrievalConfig {
    RetrievalConfig {
        score_threshold: 0.0,
        ..RetrievalConfig::default()
    }
}

fn assistant(
    backend: Arc<InMemoryVectorStore>,
    generator: MockProvider,
) -> CodeAssistant<MockProvider> {
    let retriever = CodeRetriever::new(
        CodeStore::new(backend, COLLECTION),
        embedder(),
        retrieval_config(),
    );
    CodeAssistant::new(
        retriever,
        Reranker::new(RerankConfig::default()),
        ContextConfig::default(),
        Arc::new(generator),
        Duration::from_secs(5),
    )
}

fn backend_repo(root: &Path, files: usize) {
    for i in 0..files {
        write(
            root,
            &format!("lib/backend/invoice_{i}.ex"),
            &format!(
                "defmodule Backend.Invoice{i} do\n  def total_{i}(items), do: Enum.sum(items)\n  def tax_{i}(amount), do: amount * {i}\nend\n"
            ),
        );
    }
}

fn schemas_repo(root: &Path, files: usize) {
    for i in 0..files {
        write(
            root,
            &format!("lib/schemas/invoice_{i}.ex"),
            &format!(
                "defmodule Schemas.Invoice{i} do\n  use Ecto.Schema\n  schema \"invoices_{i}\" do\n    field :total_{i}, :integer\n  end\nend\n"
            ),
        );
    }
}

async fn index(
    backend: &Arc<InMemoryVectorStore>,
    root: &Path,
    repo: &str,
) -> coderag_index::IndexReport {
    CodeIndexer::new(
        CodeStore::new(backend.clone(), COLLECTION),
        embedder(),
        IndexerConfig::default(),
    )
    .index_repo(root, repo)
    .await
    .unwrap()
}

#[tokio::test]
async fn repo_filter_returns_only_that_repo() {
    let backend_dir = tempfile::tempdir().unwrap();
    let schemas_dir = tempfile::tempdir().unwrap();
    backend_repo(backend_dir.path(), 8);
    schemas_repo(schemas_dir.path(), 8);

    let store = Arc::new(InMemoryVectorStore::new());
    index(&store, backend_dir.path(), "backend").await;
    index(&store, schemas_dir.path(), "schemas").await;
    assert_eq!(store.len(COLLECTION), 16);

    let assistant = assistant(store, MockProvider::default());
    let query = Query::new("invoice total").with_repo("backend").with_k(5);
    let context = assistant.context_for(&query).await.unwrap();

    assert_eq!(context.chunks.len(), 5);
    assert!(context.chunks.iter().all(|c| c.chunk.repo == "backend"));
    assert!(!context.truncated);
}

#[tokio::test]
async fn empty_index_answers_without_grounding() {
    let generator = MockProvider::with_responses(vec!["general answer".into()]);
    let assistant = assistant(Arc::new(InMemoryVectorStore::new()), generator.clone());

    let answer = assistant
        .ask(&Query::new("how are refunds issued?"), &[])
        .await
        .unwrap();

    assert_eq!(answer.text, "general answer");
    assert!(!answer.grounded);
    assert!(answer.context.chunks.is_empty());
    assert!(!answer.context.truncated);

    let requests = generator.recorded_requests();
    assert_eq!(requests.len(), 1);
    let user = requests[0].last().unwrap();
    assert_eq!(user.role, Role::User);
    assert!(user.content.contains(NO_GROUNDING_NOTICE));
    assert!(user.content.ends_with("Question: how are refunds issued?"));
}

#[tokio::test]
async fn grounded_answer_carries_context_and_history() {
    let dir = tempfile::tempdir().unwrap();
    backend_repo(dir.path(), 3);
    write(
        dir.path(),
        "lib/backend/refunds.ex",
        "defmodule Backend.Refunds do\n  @doc \"Issues a refund for a paid invoice\"\n  def issue_refund(invoice) do\n    {:ok, invoice}\n  end\nend\n",
    );
    let store = Arc::new(InMemoryVectorStore::new());
    index(&store, dir.path(), "backend").await;

    let generator = MockProvider::default();
    let assistant = assistant(store, generator.clone());
    let history = vec![Message::user("hi"), Message::assistant("hello")];
    let answer = assistant
        .ask(&Query::new("issue_refund refund").with_k(2), &history)
        .await
        .unwrap();

    assert!(answer.grounded);
    assert!(answer.context.chunks.len() <= 2);
    assert_eq!(
        answer.context.chunks[0].chunk.file_path,
        "lib/backend/refunds.ex"
    );

    let request = &generator.recorded_requests()[0];
    assert_eq!(request.len(), 4);
    assert_eq!(request[0].role, Role::System);
    assert_eq!(&request[1..3], history.as_slice());
    assert!(request[3].content.contains("<code_context>"));
    assert!(request[3].content.contains("file=\"lib/backend/refunds.ex\""));
}

#[tokio::test]
async fn reindexing_is_idempotent_and_replaces_stale_chunks() {
    let dir = tempfile::tempdir().unwrap();
    backend_repo(dir.path(), 4);
    let store = Arc::new(InMemoryVectorStore::new());

    let first = index(&store, dir.path(), "backend").await;
    assert_eq!(first.chunks_created, 4);

    let second = index(&store, dir.path(), "backend").await;
    assert_eq!(second.chunks_created, 0);
    assert_eq!(second.chunks_skipped, 4);
    assert_eq!(second.chunks_removed, 0);
    assert_eq!(store.len(COLLECTION), 4);

    write(
        dir.path(),
        "lib/backend/invoice_0.ex",
        "defmodule Backend.Invoice0 do\n  def total_0(items), do: length(items)\nend\n",
    );
    fs::remove_file(dir.path().join("lib/backend/invoice_3.ex")).unwrap();

    let third = index(&store, dir.path(), "backend").await;
    assert_eq!(third.chunks_created, 1);
    assert_eq!(third.chunks_skipped, 2);
    assert_eq!(third.chunks_removed, 2);
    assert_eq!(store.len(COLLECTION), 3);
}

#[tokio::test]
async fn reindexing_one_repo_leaves_others_alone() {
    let backend_dir = tempfile::tempdir().unwrap();
    let schemas_dir = tempfile::tempdir().unwrap();
    backend_repo(backend_dir.path(), 2);
    schemas_repo(schemas_dir.path(), 3);

    let store = Arc::new(InMemoryVectorStore::new());
    index(&store, backend_dir.path(), "backend").await;
    index(&store, schemas_dir.path(), "schemas").await;

    fs::remove_file(backend_dir.path().join("lib/backend/invoice_1.ex")).unwrap();
    let report = index(&store, backend_dir.path(), "backend").await;
    assert_eq!(report.chunks_removed, 1);
    assert_eq!(store.len(COLLECTION), 4);
}

#[tokio::test]
async fn generation_failure_is_surfaced() {
    let dir = tempfile::tempdir().unwrap();
    backend_repo(dir.path(), 1);
    let store = Arc::new(InMemoryVectorStore::new());
    index(&store, dir.path(), "backend").await;

    let err = assistant(store, MockProvider::failing())
        .ask(&Query::new("invoice"), &[])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IndexError::DependencyUnavailable {
            dependency: Dependency::Generator,
            ..
        }
    ));
}

#[tokio::test]
async fn generation_timeout_is_surfaced() {
    let retriever = CodeRetriever::new(
        CodeStore::new(Arc::new(InMemoryVectorStore::new()), COLLECTION),
        embedder(),
        retrieval_config(),
    );
    let assistant = CodeAssistant::new(
        retriever,
        Reranker::default(),
        ContextConfig::default(),
        Arc::new(MockProvider::default().with_delay(500)),
        Duration::from_millis(20),
    );
    let err = assistant.ask(&Query::new("q"), &[]).await.unwrap_err();
    assert!(err.to_string().starts_with("generator unavailable"));
}

#[tokio::test]
async fn empty_repository_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "test/only_test.exs", "defmodule OnlyTest do\nend\n");
    let err = CodeIndexer::new(
        CodeStore::new(Arc::new(InMemoryVectorStore::new()), COLLECTION),
        embedder(),
        IndexerConfig::default(),
    )
    .index_repo(dir.path(), "tests-only")
    .await
    .unwrap_err();
    assert!(matches!(err, IndexError::EmptyRepository { .. }));
}

#[tokio::test]
async fn unreadable_file_keeps_previous_chunks_retrievable() {
    let dir = tempfile::tempdir().unwrap();
    backend_repo(dir.path(), 2);
    let store = Arc::new(InMemoryVectorStore::new());
    index(&store, dir.path(), "backend").await;

    fs::write(dir.path().join("lib/backend/invoice_1.ex"), [0xff, 0xfe, 0x00]).unwrap();
    let report = index(&store, dir.path(), "backend").await;
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("lib/backend/invoice_1.ex: "));
    assert_eq!(report.chunks_removed, 0);
    assert_eq!(store.len(COLLECTION), 2);

    let query = Query::new("tax_1 amount").with_repo("backend").with_k(5);
    let context = assistant(store, MockProvider::default())
        .context_for(&query)
        .await
        .unwrap();
    assert!(
        context
            .chunks
            .iter()
            .any(|c| c.chunk.file_path == "lib/backend/invoice_1.ex")
    );
}

#[tokio::test]
async fn emptied_repository_is_reported_and_cleared() {
    let backend_dir = tempfile::tempdir().unwrap();
    let schemas_dir = tempfile::tempdir().unwrap();
    backend_repo(backend_dir.path(), 3);
    schemas_repo(schemas_dir.path(), 2);
    let store = Arc::new(InMemoryVectorStore::new());
    index(&store, backend_dir.path(), "backend").await;
    index(&store, schemas_dir.path(), "schemas").await;
    assert_eq!(store.len(COLLECTION), 5);

    fs::remove_dir_all(backend_dir.path().join("lib")).unwrap();
    let err = CodeIndexer::new(
        CodeStore::new(store.clone(), COLLECTION),
        embedder(),
        IndexerConfig::default(),
    )
    .index_repo(backend_dir.path(), "backend")
    .await
    .unwrap_err();
    assert!(matches!(err, IndexError::EmptyRepository { repo } if repo == "backend"));
    assert_eq!(store.len(COLLECTION), 2);

    let context = assistant(store, MockProvider::default())
        .context_for(&Query::new("invoice total").with_repo("backend"))
        .await
        .unwrap();
    assert!(context.chunks.is_empty());
}

#[tokio::test]
async fn reset_then_reindex_starts_from_scratch() {
    let dir = tempfile::tempdir().unwrap();
    backend_repo(dir.path(), 3);
    let store = Arc::new(InMemoryVectorStore::new());
    index(&store, dir.path(), "backend").await;

    assert!(CodeStore::new(store.clone(), COLLECTION).reset().await.unwrap());
    assert!(store.is_empty(COLLECTION));

    let report = index(&store, dir.path(), "backend").await;
    assert_eq!(report.chunks_created, 3);
    assert_eq!(report.chunks_skipped, 0);
    assert_eq!(store.len(COLLECTION), 3);
}
