use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use hostlink_factory::{ProgramConfig, TransportKind};

use crate::cmd::CheckArgs;
use crate::exit::{factory_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

pub fn run(args: CheckArgs, format: OutputFormat) -> CliResult<i32> {
    let config = ProgramConfig::from_path(&args.path)
        .map_err(|err| factory_error(&format!("failed reading {}", args.path.display()), err))?;
    let kind = config
        .validate()
        .map_err(|err| factory_error(&format!("invalid config {}", args.path.display()), err))?;

    match format {
        OutputFormat::Json | OutputFormat::Raw => {
            let json = config
                .to_json_pretty()
                .map_err(|err| factory_error("failed rendering config", err))?;
            println!("{json}");
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (field, value) in summary(&config, kind) {
                table.add_row(vec![field.to_string(), value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (field, value) in summary(&config, kind) {
                println!("{field}: {value}");
            }
        }
    }
    Ok(SUCCESS)
}

fn summary(config: &ProgramConfig, kind: TransportKind) -> Vec<(&'static str, String)> {
    let mut rows = vec![
        ("process_name", config.process_name.clone()),
        ("transport_type", kind.to_string()),
    ];
    match kind {
        TransportKind::Tcp | TransportKind::Udp => {
            rows.push(("host", config.host.clone()));
            rows.push(("port", config.port.to_string()));
        }
        TransportKind::Serial => {
            rows.push(("port_name", config.port_name.clone()));
            rows.push(("baud_rate", config.serial.baud_rate.to_string()));
        }
        TransportKind::InMemory => rows.push(("channel_id", config.channel_id.clone())),
    }
    if kind == TransportKind::Udp {
        rows.push((
            "reliable_delivery",
            config.udp.enable_reliable_delivery.to_string(),
        ));
    }
    rows.push(("max_retry_attempts", config.max_retry_attempts.to_string()));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_serial_target() {
        let config = ProgramConfig {
            transport_type: "serial".to_string(),
            port_name: "COM3".to_string(),
            ..ProgramConfig::default()
        };
        let rows = summary(&config, TransportKind::Serial);

        assert!(rows.contains(&("transport_type", "Serial".to_string())));
        assert!(rows.contains(&("port_name", "COM3".to_string())));
        assert!(!rows.iter().any(|(field, _)| *field == "host"));
    }
}
