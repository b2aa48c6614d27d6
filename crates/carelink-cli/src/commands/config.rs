use carelink_core::config::{SyncSettings, ENV_ENCRYPTION_KEY};
use carelink_core::policy::FieldCipher;
use carelink_core::util::{is_http_url, normalize_text_option};

use crate::cli::ConfigCommands;
use crate::commands::common::{load_settings, StoragePaths};
use crate::error::CliError;

/// Explicit values for `config init`
#[derive(Debug, Default)]
pub struct InitOptions {
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub tenant_id: Option<String>,
    pub device_id: Option<String>,
    pub generate_key: bool,
    pub force: bool,
}

pub fn run_config(command: ConfigCommands, paths: &StoragePaths) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            supabase_url,
            supabase_anon_key,
            tenant_id,
            device_id,
            generate_key,
            force,
        } => {
            let options = InitOptions {
                supabase_url,
                supabase_anon_key,
                tenant_id,
                device_id,
                generate_key,
                force,
            };
            let settings = run_config_init(options, paths)?;
            println!("Wrote settings to {}", paths.config.display());
            println!("Device id: {}", settings.device_id);
            if let Some(key) = &settings.encryption_key {
                println!("Encryption keys are never written to the settings file. Keep this one:");
                println!("  {}", key_export_hint(key));
            }
            if settings.supabase_url.is_none() {
                println!("No Supabase URL set; records will stay local until one is configured.");
            }
            Ok(())
        }
        ConfigCommands::Show => {
            let settings = load_settings(&paths.config)?;
            println!("# {}", paths.config.display());
            println!("{settings:#?}");
            Ok(())
        }
        ConfigCommands::Keygen => {
            let key = FieldCipher::generate_key();
            println!("{key}");
            eprintln!("{}", key_export_hint(&key));
            Ok(())
        }
    }
}

/// Shell line that makes `key` available to later commands
pub fn key_export_hint(key: &str) -> String {
    format!("export {ENV_ENCRYPTION_KEY}={key}")
}

pub fn run_config_init(options: InitOptions, paths: &StoragePaths) -> Result<SyncSettings, CliError> {
    let existing = if paths.config.exists() {
        if !options.force {
            return Err(CliError::ConfigExists(paths.config.clone()));
        }
        SyncSettings::load_from_path(&paths.config).ok()
    } else {
        None
    };

    let mut settings = SyncSettings {
        supabase_url: normalize_text_option(options.supabase_url),
        supabase_anon_key: normalize_text_option(options.supabase_anon_key),
        ..SyncSettings::default()
    };
    if let Some(url) = &settings.supabase_url {
        if !is_http_url(url) {
            return Err(CliError::Config(format!(
                "Supabase URL must start with http:// or https://, got '{url}'"
            )));
        }
    }
    if let Some(tenant_id) = normalize_text_option(options.tenant_id) {
        settings.tenant_id = tenant_id;
    }
    // Overwriting keeps the device identity unless a new one is given.
    if let Some(device_id) = normalize_text_option(options.device_id)
        .or_else(|| existing.map(|existing| existing.device_id))
    {
        settings.device_id = device_id;
    }
    if options.generate_key {
        settings.encryption_key = Some(FieldCipher::generate_key());
    }

    settings.validate()?;
    settings.save_to_path(&paths.config)?;
    Ok(settings)
}
