use mockito::Matcher;
use newswatch::llm::ollama::OllamaProvider;
use newswatch::llm::{LlmProvider, LlmRequest};
use serde_json::json;

#[tokio::test]
async fn generate_posts_non_streaming_request_with_context_window() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/api/generate")
        .match_body(Matcher::PartialJson(json!({
            "model": "mistral:7b-instruct-q4_K_M",
            "stream": false,
            "options": {"num_ctx": 2048}
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"model": "mistral:7b-instruct-q4_K_M", "response": "{\"summary\": \"Готово.\"}",
                "done": true, "prompt_eval_count": 42, "eval_count": 8}"#,
        )
        .create_async()
        .await;

    let provider = OllamaProvider::new(server.url(), "mistral:7b-instruct-q4_K_M");
    let response = provider
        .generate(LlmRequest {
            prompt: "Summarize".to_string(),
            temperature: Some(0.3),
            context_window: Some(2048),
            ..LlmRequest::default()
        })
        .await
        .unwrap();

    assert_eq!(response.content, "{\"summary\": \"Готово.\"}");
    assert_eq!(response.usage.total_tokens, 50);
    mock.assert_async().await;
}

#[tokio::test]
async fn generate_surfaces_server_errors() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/generate")
        .with_status(500)
        .with_body("model not loaded")
        .create_async()
        .await;

    let provider = OllamaProvider::new(server.url(), "mistral");
    let err = provider.generate(LlmRequest::default()).await.unwrap_err();
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn health_lists_installed_models() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/tags")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"models": [{"name": "mistral:7b-instruct-q4_K_M"}, {"name": "llama3:8b"}]}"#)
        .create_async()
        .await;

    let provider = OllamaProvider::new(format!("{}/", server.url()), "mistral");
    let models = provider.health().await.unwrap();
    assert_eq!(models, vec!["mistral:7b-instruct-q4_K_M", "llama3:8b"]);
    mock.assert_async().await;
}
