use stress_test::{stress_test_placements, stress_test_semantics};
use tracing_subscriber::EnvFilter;
pub mod stress_test;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║        SESSION SEMANTICS STRESS TESTS                      ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Test 1: every semantic, small scale
    let small = stress_test_semantics(3, 8, 100).await?;

    // Test 2: every semantic, more replicas and clients
    let medium = stress_test_semantics(5, 32, 200).await?;

    // Test 3: placement policies under causal sessions
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          PLACEMENT ANALYSIS (Causal)                       ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    stress_test_placements(3, 16, 200).await?;

    let diverged = small.iter().chain(&medium).filter(|s| !s.converged).count();
    if diverged > 0 {
        return Err(format!("{} workloads did not converge", diverged).into());
    }
    println!("\n✓ All stress tests completed successfully!");
    Ok(())
}
