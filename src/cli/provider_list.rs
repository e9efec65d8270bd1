use std::error::Error;

use crate::auth::{AuthManager, ProviderStatus};

pub fn list_providers(env_only: bool) -> Result<(), Box<dyn Error>> {
    let auth_manager = AuthManager::load(!env_only)?;
    let statuses = auth_manager.provider_statuses();
    if statuses.is_empty() {
        println!("No providers configured.");
        return Ok(());
    }

    let default_provider = auth_manager.config().default_provider.as_deref();
    print!("{}", format_provider_table(&statuses, default_provider));
    Ok(())
}

/// Render provider statuses as an aligned text table.
pub fn format_provider_table(statuses: &[ProviderStatus], default_provider: Option<&str>) -> String {
    let rows: Vec<[String; 4]> = statuses
        .iter()
        .map(|status| {
            let id = if default_provider.is_some_and(|d| d.eq_ignore_ascii_case(&status.id)) {
                format!("{}*", status.id)
            } else {
                status.id.clone()
            };
            let auth = if !status.is_ready() {
                "❌".to_string()
            } else if !status.requires_key {
                "no key needed".to_string()
            } else if status.has_stored_key {
                "✅ keyring".to_string()
            } else {
                format!("✅ {}", status.env_key.as_deref().unwrap_or("env"))
            };
            [id, status.display_name.clone(), status.base_url.clone(), auth]
        })
        .collect();

    let header = ["Provider", "Display Name", "URL", "Authenticated"];
    let mut widths = header.map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::from("Configured Providers:\n\n");
    let format_row = |cells: [&str; 4]| {
        let mut line = String::new();
        for (i, cell) in cells.iter().enumerate() {
            if i + 1 == cells.len() {
                line.push_str(cell);
            } else {
                let pad = widths[i] - cell.chars().count();
                line.push_str(cell);
                line.push_str(&" ".repeat(pad + 2));
            }
        }
        line.push('\n');
        line
    };

    out.push_str(&format_row(header));
    for row in &rows {
        out.push_str(&format_row([&row[0], &row[1], &row[2], &row[3]]));
    }
    if default_provider.is_some() {
        out.push_str("\n* = default provider\n");
    }
    out
}
