use hostlink_factory::TransportFactory;
use hostlink_transport::ChannelRegistry;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("hostlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let transports = TransportFactory::with_defaults(ChannelRegistry::new()).transport_types();

    println!("name: hostlink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("HOSTLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("transports: {}", transports.join(", "));
    println!("features: serial=true, cli=true");

    Ok(SUCCESS)
}
