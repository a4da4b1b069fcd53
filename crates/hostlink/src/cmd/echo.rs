use tracing::{debug, info};

use crate::cmd::target::Session;
use crate::cmd::EchoArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{payload_preview, OutputFormat};

pub async fn run(args: EchoArgs, _format: OutputFormat) -> CliResult<i32> {
    let mut session = Session::open(&args.target).await?;
    let result = echo_until_done(&mut session, args.count).await;
    session.close().await;
    result.map(|()| SUCCESS)
}

async fn echo_until_done(session: &mut Session, count: Option<usize>) -> CliResult<()> {
    let mut echoed = 0usize;

    loop {
        let message = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(echoed, "interrupted");
                return Ok(());
            }
            message = session.next_message() => message?,
        };

        let Some(payload) = message else {
            return Err(session.failure("connection closed"));
        };

        debug!(size = payload.len(), payload = %payload_preview(&payload), "echoing");
        session.send(&payload).await?;
        echoed = echoed.saturating_add(1);

        if count.is_some_and(|count| echoed >= count) {
            return Ok(());
        }
    }
}
