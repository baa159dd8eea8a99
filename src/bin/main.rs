use financial_qa_orchestrator::{
    audit::AuditLog,
    classifier::IntentClassifier,
    config::OrchestratorConfig,
    models::{ChatTurn, ExperienceLevel, RequestInput, UserProfile},
    responders::{create_default_registry, create_offline_registry},
    workflow::Orchestrator,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    info!("Financial Q&A Orchestrator starting");

    let config = OrchestratorConfig::from_env()?;

    // Canned answers unless at least one backing service is configured
    let offline = config.gemini_api_key.is_none() && config.financial_api_base_url.is_none();
    let registry = if offline {
        info!("No external services configured; using offline responders");
        create_offline_registry(&config)
    } else {
        create_default_registry(&config)?
    };

    let orchestrator = Orchestrator::new(
        IntentClassifier::from_config(&config),
        Arc::new(registry),
        &config,
        AuditLog::new(),
    );

    let input = RequestInput {
        message: "My portfolio is worth $50,000 and I want to reach a goal of $200,000 in 10 years"
            .to_string(),
        session_id: None,
        conversation_history: vec![
            ChatTurn::user("I hold VTI and some AAPL."),
            ChatTurn::assistant("Thanks, noted."),
        ],
        user_profile: Some(UserProfile {
            experience_level: Some(ExperienceLevel::Beginner),
            ..UserProfile::default()
        }),
    };

    info!(message = %input.message, "Running orchestrator");

    let response = orchestrator.handle_request(input).await;

    println!("\n=== ORCHESTRATION RESULT ===");
    println!("Request ID: {}", response.request_id);
    println!("Stage: {}", response.stage);
    println!("Confidence: {:.2}", response.confidence);
    println!("Intents: {:?}", response.detected_intents);
    println!("Responders: {:?}", response.selected_responders);
    println!("\n{}", response.final_response);
    println!("\nCitations:");
    for citation in &response.final_citations {
        println!("  - {} ({})", citation.title, citation.source_url);
    }
    println!("\nTimings:");
    for timing in &response.per_responder_timings {
        println!("  {}: {:?} in {} ms", timing.responder, timing.status, timing.elapsed_ms);
    }
    println!("\nStage Trace:");
    for (i, trace) in response.stage_trace.iter().enumerate() {
        println!("  {}: {}", i + 1, trace);
    }

    Ok(())
}
