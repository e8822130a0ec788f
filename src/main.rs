use std::{process, rc::Rc};

use portal_query::{
    application::{
        catalog::CatalogService, characters::CharacterFilters, episodes::EpisodeFilters,
        error::AppError, session::Session,
    },
    config::{self, CharactersArgs, Command, EpisodesArgs, LocationsArgs},
    domain::FetchError,
    infra::{catalog::HttpCatalog, telemetry},
    presentation::views,
};
use tokio::task::LocalSet;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

fn main() {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            let error = AppError::unexpected(format!("failed to start runtime: {err}"));
            report_application_error(&error);
            process::exit(error.exit_code());
        }
    };

    let local = LocalSet::new();
    if let Err(error) = local.block_on(&runtime, run()) {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let summary = error.report().summary();
    if dispatcher::has_been_set() {
        error!(error = %summary, "application error");
    } else {
        let subscriber = tracing_fmt()
            .with_writer(std::io::stderr)
            .with_max_level(Level::ERROR)
            .finish();
        let dispatch = Dispatch::new(subscriber);
        dispatcher::with_default(&dispatch, || {
            error!(error = %summary, "application error");
        });
    }
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    let catalog = HttpCatalog::new(&settings.catalog)?;
    info!(base_url = %catalog.base_url(), "Catalog client ready");

    let catalog: Rc<dyn CatalogService> = Rc::new(catalog);
    let session = Session::new(catalog, settings.cache_config());

    match cli_args.command {
        Command::Characters(args) => run_characters(&session, args).await,
        Command::Episodes(args) => run_episodes(&session, args).await,
        Command::Locations(args) => run_locations(&session, args).await,
    }
}

async fn run_characters(session: &Session, args: CharactersArgs) -> Result<(), AppError> {
    let search = session.character_search_with(CharacterFilters {
        name: args.name.unwrap_or_default(),
        species: args.species.unwrap_or_default(),
        status: args.status,
        page: args.page,
    });

    let view = search.ready().await;
    print!("{}", views::render_characters(&view, search.page()));
    into_result(view.error)
}

async fn run_episodes(session: &Session, args: EpisodesArgs) -> Result<(), AppError> {
    let list = session.episode_list_with(EpisodeFilters {
        name: args.name.unwrap_or_default(),
        page: args.page,
    });

    let view = list.ready().await;
    print!("{}", views::render_episodes(&view, list.page()));
    into_result(view.error)
}

async fn run_locations(session: &Session, args: LocationsArgs) -> Result<(), AppError> {
    let explorer = session.location_explorer();
    explorer.set_query(args.query);
    explorer.flush();
    explorer.ready().await;

    if let Some(index) = args.pick {
        let found = explorer.options().data.map_or(0, |options| options.len());
        if explorer.select_option(index).is_none() {
            return Err(AppError::validation(format!(
                "no search result at index {index} ({found} found)"
            )));
        }
        explorer.ready().await;
    }

    print!(
        "{}",
        views::render_locations(
            &explorer.options(),
            &explorer.location(),
            &explorer.residents(),
            &explorer.chain_state(),
        )
    );
    into_result(explorer.options().error.or_else(|| explorer.error()))
}

fn into_result(error: Option<FetchError>) -> Result<(), AppError> {
    error.map_or(Ok(()), |err| Err(AppError::from(err)))
}
