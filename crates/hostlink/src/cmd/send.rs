use std::fs;

use crate::cmd::target::{parse_duration, Session};
use crate::cmd::SendArgs;
use crate::exit::{CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_message, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;

    let mut session = Session::open(&args.target).await?;
    let result = exchange(&mut session, &payload, args.wait.then_some(wait_timeout), format).await;
    session.close().await;
    result.map(|()| SUCCESS)
}

async fn exchange(
    session: &mut Session,
    payload: &[u8],
    wait: Option<std::time::Duration>,
    format: OutputFormat,
) -> CliResult<()> {
    session.send(payload).await?;

    if let Some(timeout) = wait {
        let reply = session.reply(timeout).await?;
        print_message(&reply, session.transport().kind(), session.source(), format);
    }
    Ok(())
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(json.as_bytes().to_vec());
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Vec::new())
}
