use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use proxy_control::config::loader::load_or_default;
use proxy_control::controller::{
    CommandSupervisor, FsStorage, HostRequest, ProxyController, ServiceEntry, ServiceIdentity, TlsMaterial,
};
use proxy_control::observability;
use proxy_control::table::{
    BackendAddress, BackendItem, Directive, HostKey, Interface, LoadBalancing, Protocol, RouteOptions,
};

type Controller = ProxyController<FsStorage, CommandSupervisor>;

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Management CLI for the reverse-proxy route table", long_about = None)]
struct Cli {
    /// Settings file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the route table as JSON
    Show,
    /// Print the configuration text the table renders to
    Render,
    /// Register a virtual host
    AddHost {
        hostname: String,
        /// Plain listen port (repeatable)
        #[arg(long = "listen")]
        listen: Vec<u16>,
        /// Encrypted listen port (repeatable)
        #[arg(long = "listen-ssl")]
        listen_ssl: Vec<u16>,
        /// Listen address for every port
        #[arg(long)]
        bind: Option<String>,
        /// Certificate path referenced as is
        #[arg(long, conflicts_with = "certificate_file")]
        certificate: Option<String>,
        /// Certificate file whose content is copied next to the proxy file
        #[arg(long)]
        certificate_file: Option<PathBuf>,
        #[arg(long, conflicts_with = "key_file")]
        key: Option<String>,
        #[arg(long)]
        key_file: Option<PathBuf>,
        /// Extra server directive, `name value` (repeatable)
        #[arg(long = "directive", value_parser = parse_directive)]
        directives: Vec<Directive>,
    },
    /// Remove a virtual host by key or unique hostname
    RemoveHost { host: String },
    /// Route a path of a host to backends
    AddRoute {
        host: String,
        path: String,
        /// `host[:port][@weight]` (repeatable)
        #[arg(long = "backend", required = true, value_parser = parse_backend)]
        backends: Vec<BackendItem>,
        #[arg(long, default_value = "http", value_parser = parse_protocol)]
        protocol: Protocol,
        /// Path prefix on the backends
        #[arg(long)]
        root: Option<String>,
        #[arg(long = "lb", default_value = "round-robin")]
        load_balancing: LoadBalancing,
        /// Location directive, `name value` (repeatable)
        #[arg(long = "directive", value_parser = parse_directive)]
        directives: Vec<Directive>,
    },
    /// Remove a route, or one backend from it
    RemoveRoute {
        host: String,
        path: String,
        /// `host[:port]`
        #[arg(long, value_parser = parse_address)]
        backend: Option<BackendAddress>,
    },
    /// Route services from a JSON file (array of service entries)
    RegisterService { host: String, file: PathBuf },
    /// Remove a service's versioned route
    RemoveService {
        host: String,
        application: String,
        module: String,
        name: String,
        version: Option<String>,
    },
    /// Restart the proxy daemon through the supervisor commands
    Restart,
}

fn parse_directive(raw: &str) -> Result<Directive, String> {
    let raw = raw.trim().trim_end_matches(';');
    match raw.split_once(char::is_whitespace) {
        Some((name, value)) => Ok(Directive::new(name, value.trim())),
        None if !raw.is_empty() => Ok(Directive::new(raw, "")),
        None => Err("directive must not be empty".to_string()),
    }
}

fn parse_address(raw: &str) -> Result<BackendAddress, String> {
    BackendAddress::parse(raw).ok_or_else(|| format!("invalid backend address '{}'", raw))
}

fn parse_backend(raw: &str) -> Result<BackendItem, String> {
    let (address, weight) = match raw.rsplit_once('@') {
        Some((address, weight)) => {
            let weight = weight
                .parse::<u32>()
                .ok()
                .filter(|w| *w >= 1)
                .ok_or_else(|| format!("invalid weight '{}'", weight))?;
            (address, weight)
        }
        None => (raw, 1),
    };
    Ok(BackendItem::new(parse_address(address)?).with_weight(weight))
}

fn parse_protocol(raw: &str) -> Result<Protocol, String> {
    match raw {
        "plain" => Ok(Protocol::Plain),
        "encrypted" => Ok(Protocol::Encrypted),
        other => Protocol::from_scheme(other).ok_or_else(|| format!("unknown protocol '{}'", other)),
    }
}

fn resolve(controller: &Controller, host: &str) -> Result<HostKey, Box<dyn std::error::Error>> {
    let table = controller.read_table()?;
    table
        .resolve_host(host)
        .ok_or_else(|| format!("no single virtual host matches '{}'", host).into())
}

fn tls(path: Option<String>, file: Option<PathBuf>) -> Result<Option<TlsMaterial>, std::io::Error> {
    match (path, file) {
        (Some(path), _) => Ok(Some(TlsMaterial::Path(path))),
        (None, Some(file)) => Ok(Some(TlsMaterial::Inline(std::fs::read_to_string(file)?))),
        (None, None) => Ok(None),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_or_default(cli.config.as_deref())?;
    observability::init_logging(&config.observability)?;

    let supervisor = CommandSupervisor::from_config(&config.supervisor);
    let controller = ProxyController::new(config, FsStorage, supervisor);

    match cli.command {
        Commands::Show => {
            let table = controller.read_table()?;
            print_json(&serde_json::json!({
                "summary": table.summary(),
                "table": table,
            }))?;
        }
        Commands::Render => print!("{}", controller.render()?),
        Commands::AddHost {
            hostname,
            listen,
            listen_ssl,
            bind,
            certificate,
            certificate_file,
            key,
            key_file,
            directives,
        } => {
            let interfaces = listen
                .into_iter()
                .map(Interface::plain)
                .chain(listen_ssl.into_iter().map(Interface::encrypted))
                .map(|interface| match &bind {
                    Some(address) => interface.with_address(address.clone()),
                    None => interface,
                })
                .collect();
            let mut request = HostRequest::new(hostname, interfaces);
            request.certificate = tls(certificate, certificate_file)?;
            request.certificate_key = tls(key, key_file)?;
            request.extra_directives = directives;
            print_json(&controller.register_virtual_host(request)?)?;
        }
        Commands::RemoveHost { host } => {
            let key = resolve(&controller, &host)?;
            print_json(&controller.remove_virtual_host(&key)?)?;
        }
        Commands::AddRoute {
            host,
            path,
            backends,
            protocol,
            root,
            load_balancing,
            directives,
        } => {
            let key = resolve(&controller, &host)?;
            let options = RouteOptions {
                load_balancing,
                protocol,
                source_root: root,
                proxy_directives: directives,
            };
            print_json(&controller.register_route(&key, &path, backends, &options)?)?;
        }
        Commands::RemoveRoute { host, path, backend } => {
            let key = resolve(&controller, &host)?;
            print_json(&controller.remove_route(&key, &path, backend.as_ref())?)?;
        }
        Commands::RegisterService { host, file } => {
            let key = resolve(&controller, &host)?;
            let entries: Vec<ServiceEntry> = serde_json::from_str(&std::fs::read_to_string(file)?)?;
            print_json(&controller.register_services(&key, &entries)?)?;
        }
        Commands::RemoveService {
            host,
            application,
            module,
            name,
            version,
        } => {
            let key = resolve(&controller, &host)?;
            let identity = ServiceIdentity::new(application, module, name, version.as_deref());
            print_json(&controller.remove_services(&key, &[identity])?)?;
        }
        Commands::Restart => {
            controller.restart()?;
            println!("Proxy restarted");
        }
    }

    Ok(())
}
