use std::env;
use std::sync::Arc;
use std::time::Duration;

use bosch_gateway::{Cipher, Circuit, CircuitSchema, DecryptError, HttpConnector};

/// For gateway simulators that speak plain JSON.
struct Plaintext;

impl Cipher for Plaintext {
    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        plaintext.to_vec()
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptError> {
        Ok(ciphertext.to_string())
    }
}

#[tokio::main]
async fn main() -> bosch_gateway::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let usage = "usage: read_circuit <host> <schema.json> <circuit path> [--watch]";
    let host = args.get(1).expect(usage);
    let schema_path = args.get(2).expect(usage);
    let circuit_path = args.get(3).expect(usage);
    let watch = args.iter().any(|a| a == "--watch");

    let schema = CircuitSchema::from_json(&std::fs::read_to_string(schema_path)?)?;
    let device = Arc::new(HttpConnector::<Plaintext>::builder(host.as_str()).build(Plaintext)?);
    let mut circuit = Circuit::new(device, circuit_path, schema);

    loop {
        if let Err(e) = circuit.update().await {
            eprintln!("Update error: {e}");
        }
        let target = circuit.target_temperature();
        println!(
            "[{}] mode: {} | setpoint: {} | target: {:.1}\u{00b0}C ({:.1}..{:.1}) | room: {}",
            circuit.name(),
            circuit.op_mode().current_mode(),
            circuit.setpoint().unwrap_or_default(),
            target,
            circuit.min_temp(),
            circuit.max_temp(),
            circuit
                .current_temp()
                .map(|t| format!("{t:.1}\u{00b0}C"))
                .unwrap_or_else(|| "-".to_string()),
        );
        if !watch {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
}
