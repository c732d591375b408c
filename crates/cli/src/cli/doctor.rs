use ji_domain::config::{Config, ConfigSeverity};
use ji_kernel::{ControlPlane, RestControlPlane};

/// Run all diagnostic checks and print a summary.
///
/// Returns `Ok(true)` when every check passes. A connection or auth
/// failure against the control plane is returned as an error: nothing
/// else can work without it.
pub async fn run(config: &Config, config_path: &str) -> anyhow::Result<bool> {
    println!("jupyter-interpreter doctor");
    println!("==========================\n");

    let mut all_passed = true;

    check_config_file(config_path);
    check_config_validation(config, &mut all_passed);
    check_control_plane(config, &mut all_passed).await?;

    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    Ok(all_passed)
}

// ── Individual checks ─────────────────────────────────────────────────

fn check_config_file(config_path: &str) {
    let exists = std::path::Path::new(config_path).exists();
    // Defaults plus env overrides are a valid setup, so a missing file
    // is informational.
    print_check(
        "Config file",
        true,
        if exists {
            config_path.to_owned()
        } else {
            format!("{config_path} not found (using defaults + environment)")
        },
    );
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
    } else {
        print_check(
            "Config validation",
            error_count == 0,
            format!("{} issue(s) ({} error(s))", issues.len(), error_count),
        );
        for issue in &issues {
            println!("      {issue}");
        }
        if error_count > 0 {
            *all_passed = false;
        }
    }
}

async fn check_control_plane(config: &Config, all_passed: &mut bool) -> anyhow::Result<()> {
    let url = &config.control_plane.base_url;
    let client = RestControlPlane::new(&config.control_plane)?;

    match client.validate_connection().await {
        Ok(ok) => {
            print_check("Jupyter server reachable", ok, url.clone());
            if !ok {
                *all_passed = false;
            }
            Ok(())
        }
        Err(e) if e.is_fatal_at_startup() => {
            print_check("Jupyter server reachable", false, format!("{url}: {e}"));
            Err(anyhow::anyhow!("failed to connect to Jupyter server at {url}: {e}"))
        }
        Err(e) => {
            print_check("Jupyter server reachable", false, format!("{url}: {e}"));
            *all_passed = false;
            Ok(())
        }
    }
}

fn print_check(name: &str, passed: bool, detail: String) {
    let mark = if passed { "ok" } else { "FAIL" };
    println!("  [{mark:>4}] {name}: {detail}");
}
