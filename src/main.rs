use std::{process, sync::Arc, time::Duration};

use axum::http::HeaderName;
use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use yatube::{
    application::{
        accounts::{AccountsService, NewGroup, NewUser},
        authoring::AuthoringService,
        error::AppError,
        feed::FeedService,
        repos::{CommentsRepo, FollowsRepo, GroupsRepo, PostsRepo, PostsWriteRepo, UsersRepo},
    },
    config,
    infra::{
        cache::PageCache,
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState},
        telemetry,
        uploads::UploadStorage,
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::CreateUser(args) => run_create_user(settings, args).await,
        config::Command::CreateGroup(args) => run_create_group(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let state = build_http_state(repositories, &settings)?;
    serve_http(&settings, state).await
}

async fn run_create_user(
    settings: config::Settings,
    args: config::CreateUserArgs,
) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let accounts = AccountsService::new(repositories.clone(), repositories);

    let user = accounts
        .create_user(NewUser {
            username: args.username,
            first_name: args.first_name,
            last_name: args.last_name,
        })
        .await?;

    info!(
        target = "yatube::create_user",
        id = user.id,
        username = %user.username,
        "User created"
    );
    Ok(())
}

async fn run_create_group(
    settings: config::Settings,
    args: config::CreateGroupArgs,
) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let accounts = AccountsService::new(repositories.clone(), repositories);

    let group = accounts
        .create_group(NewGroup {
            title: args.title,
            slug: args.slug,
            description: args.description,
        })
        .await?;

    info!(
        target = "yatube::create_group",
        id = group.id,
        slug = %group.slug,
        "Group created"
    );
    Ok(())
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

fn build_http_state(
    repositories: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Result<HttpState, AppError> {
    let users_repo: Arc<dyn UsersRepo> = repositories.clone();
    let groups_repo: Arc<dyn GroupsRepo> = repositories.clone();
    let posts_repo: Arc<dyn PostsRepo> = repositories.clone();
    let posts_write_repo: Arc<dyn PostsWriteRepo> = repositories.clone();
    let comments_repo: Arc<dyn CommentsRepo> = repositories.clone();
    let follows_repo: Arc<dyn FollowsRepo> = repositories.clone();

    let upload_storage = Arc::new(
        UploadStorage::new(settings.uploads.directory.clone())
            .map_err(|err| {
                AppError::from(InfraError::upload_root(&settings.uploads.directory, err))
            })?,
    );

    let feed = Arc::new(FeedService::new(
        users_repo.clone(),
        groups_repo.clone(),
        posts_repo.clone(),
        comments_repo.clone(),
        follows_repo.clone(),
    ));
    let authoring = Arc::new(AuthoringService::new(
        users_repo.clone(),
        groups_repo,
        posts_repo,
        posts_write_repo,
        comments_repo,
        follows_repo,
        upload_storage.clone(),
    ));

    let cache = settings
        .cache
        .enabled
        .then(|| PageCache::new(settings.cache.index_ttl, settings.cache.max_entries));

    let user_header = HeaderName::from_bytes(settings.server.user_header.as_bytes())
        .map_err(|err| AppError::from(InfraError::configuration(err.to_string())))?;
    let upload_limit_bytes = usize::try_from(settings.uploads.max_request_bytes.get())
        .map_err(|err| AppError::from(InfraError::configuration(err.to_string())))?;

    Ok(HttpState {
        feed,
        authoring,
        users: users_repo,
        db: repositories,
        upload_storage,
        cache,
        user_header,
        upload_limit_bytes,
    })
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "yatube::serve",
        addr = %settings.server.addr,
        "Listening"
    );

    let stopping = Arc::new(Notify::new());
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown({
        let stopping = stopping.clone();
        async move {
            shutdown_signal().await;
            stopping.notify_waiters();
        }
    });

    let grace = settings.server.graceful_shutdown;
    tokio::select! {
        result = server => result
            .map_err(|err| AppError::from(InfraError::server(err.to_string()))),
        _ = shutdown_deadline(&stopping, grace) => {
            warn!(
                target = "yatube::serve",
                grace_seconds = grace.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
            Ok(())
        }
    }
}

async fn shutdown_deadline(stopping: &Notify, grace: Duration) {
    stopping.notified().await;
    tokio::time::sleep(grace).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(target = "yatube::serve", "Shutdown signal received");
}
