use meter_service::{AccountConfig, Meter, MfaType, Site};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("info,meter_service=debug")
        .init();

    let email = std::env::var("METER_EMAIL").expect("METER_EMAIL environment variable not set");
    let password =
        std::env::var("METER_PASSWORD").expect("METER_PASSWORD environment variable not set");
    let mfa_type: MfaType = std::env::var("METER_MFA_TYPE")
        .expect("METER_MFA_TYPE environment variable not set")
        .parse()
        .expect("unsupported METER_MFA_TYPE");
    let mfa_secret =
        std::env::var("METER_MFA_SECRET").expect("METER_MFA_SECRET environment variable not set");
    let account_uuid = std::env::var("METER_ACCOUNT_UUID")
        .expect("METER_ACCOUNT_UUID environment variable not set");
    let meter_number =
        std::env::var("METER_NUMBER").expect("METER_NUMBER environment variable not set");
    let site: Site = std::env::var("METER_SITE")
        .unwrap_or_else(|_| "coned".to_string())
        .parse()
        .expect("unsupported METER_SITE");

    let config = AccountConfig::new(
        email,
        password,
        mfa_type,
        mfa_secret,
        account_uuid,
        meter_number,
    )
    .with_site(site);

    let meter = Meter::new(config).expect("invalid meter configuration");

    println!("=== All Reads ===");
    match meter.all_reads().await {
        Ok(reads) => {
            for read in reads {
                println!(
                    "{} - {}: {} {}",
                    read.start_time, read.end_time, read.value, read.unit_of_measurement
                );
            }
        }
        Err(e) => {
            eprintln!("error: {}", e);
        }
    }
}
