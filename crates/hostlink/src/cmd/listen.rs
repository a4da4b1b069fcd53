use tracing::info;

use crate::cmd::target::Session;
use crate::cmd::ListenArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_message, print_metrics, OutputFormat};

pub async fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let mut session = Session::open(&args.target).await?;
    let result = receive_until_done(&mut session, args.count, format).await;

    if args.stats {
        print_metrics(&session.transport().metrics(), format);
    }
    session.close().await;
    result.map(|()| SUCCESS)
}

async fn receive_until_done(
    session: &mut Session,
    count: Option<usize>,
    format: OutputFormat,
) -> CliResult<()> {
    let mut printed = 0usize;

    loop {
        let message = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                return Ok(());
            }
            message = session.next_message() => message?,
        };

        let Some(payload) = message else {
            return Err(session.failure("connection closed"));
        };

        print_message(&payload, session.transport().kind(), session.source(), format);
        printed = printed.saturating_add(1);

        if count.is_some_and(|count| printed >= count) {
            return Ok(());
        }
    }
}
