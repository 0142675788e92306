fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Reproducible builds pin the date through SOURCE_DATE_EPOCH
    let built_at = match std::env::var("SOURCE_DATE_EPOCH") {
        Ok(epoch) => {
            let secs: i64 = epoch.trim().parse()?;
            chrono::DateTime::from_timestamp(secs, 0)
                .ok_or_else(|| format!("SOURCE_DATE_EPOCH out of range: {}", secs))?
        }
        Err(_) => chrono::Utc::now(),
    };

    println!(
        "cargo:rustc-env=IQREC_BUILD_DATE={}",
        built_at.format("%b %e %Y")
    );
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    Ok(())
}
