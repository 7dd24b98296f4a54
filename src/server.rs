use std::{io, sync::Arc};

use actix_cors::Cors;
use actix_web::{
    web::{self, resource, scope, Data, Json, Path, Query},
    App, HttpResponse, HttpServer, Scope,
};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::{
    auth::Session,
    core::{
        catalog::{
            catalog_page, find_project, home_projects, service_cards, testimonial_feed,
            FreebieCard, OrderQuery, OrderSummary, ProductQuery, ProjectDetail, ServiceVariant,
        },
        data::{ProductSubmission, Workspace},
        forms::{relay_form, AuditLog, Fields, FormRelay},
        hosting::{decode_content, ContentStore, GithubStore},
        settings::Settings,
        site::{SiteReader, SiteRoot},
    },
    error::AppError,
    types::{
        Collection, Freebie, Product, Project, Record, Service, SiteSettings, Testimonial,
    },
};

const JSON_LIMIT: usize = 32 * 1024 * 1024;

pub struct AppState {
    pub workspace: Workspace,
    pub session: Session,
    pub site: SiteReader,
    pub relay: FormRelay,
    pub audit: AuditLog,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ContentStore + Send + Sync>,
        site: SiteReader,
        relay: FormRelay,
        audit: AuditLog,
    ) -> Self {
        AppState {
            workspace: Workspace::new(store),
            session: Session::new(),
            site,
            relay,
            audit,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        AppState::new(
            Arc::new(GithubStore::from_settings(settings)),
            SiteReader::new(SiteRoot::parse(&settings.site_root.value)),
            FormRelay::new(&settings.form_endpoint.value),
            AuditLog::new(settings.audit_dir()),
        )
    }
}

pub async fn start_server(settings: &Settings) -> io::Result<()> {
    let state = Data::new(AppState::from_settings(settings));
    let addr = settings.addr();
    info!("Binding to {}", addr);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(configure)
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_header()
                    .allow_any_method(),
            )
    })
    .bind(addr)?
    .run()
    .await
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    let admin = scope("/admin")
        .service(
            resource("/session")
                .route(web::post().to(sign_in_handler))
                .route(web::delete().to(sign_out_handler)),
        )
        .service(
            resource("/settings")
                .route(web::get().to(settings_handler))
                .route(web::put().to(save_settings_handler)),
        )
        .service(resource("/assets").route(web::post().to(asset_handler)))
        .service(
            resource("/products")
                .route(web::get().to(list_handler::<Product>))
                .route(web::post().to(create_product_handler)),
        )
        .service(
            resource("/products/{index}")
                .route(web::put().to(update_product_handler))
                .route(web::delete().to(delete_handler::<Product>)),
        );
    let admin = collection_routes::<Project>(admin);
    let admin = collection_routes::<Freebie>(admin);
    let admin = collection_routes::<Service>(admin);
    let admin = collection_routes::<Testimonial>(admin);

    let site = scope("/site")
        .service(resource("/products").route(web::get().to(products_handler)))
        .service(resource("/projects").route(web::get().to(projects_handler)))
        .service(resource("/projects/{id}").route(web::get().to(project_handler)))
        .service(resource("/services").route(web::get().to(services_handler)))
        .service(resource("/freebies").route(web::get().to(freebies_handler)))
        .service(resource("/testimonials").route(web::get().to(testimonials_handler)))
        .service(resource("/order").route(web::get().to(order_handler)))
        .service(resource("/forms").route(web::post().to(form_handler)));

    cfg.app_data(web::JsonConfig::default().limit(JSON_LIMIT))
        .service(
            scope("/v1")
                .service(resource("/status").route(web::get().to(status_handler)))
                .service(admin)
                .service(site),
        );
}

fn collection_routes<T: Record>(admin: Scope) -> Scope {
    let name = T::COLLECTION.name();
    admin
        .service(
            resource(format!("/{}", name))
                .route(web::get().to(list_handler::<T>))
                .route(web::post().to(create_handler::<T>)),
        )
        .service(
            resource(format!("/{}/{{index}}", name))
                .route(web::put().to(update_handler::<T>))
                .route(web::delete().to(delete_handler::<T>)),
        )
}

fn session_token<'a>(state: &AppState, auth: &'a BearerAuth) -> Result<&'a str, AppError> {
    state.session.check_auth(auth.token())?;
    Ok(auth.token().trim())
}

async fn status_handler() -> HttpResponse {
    HttpResponse::Ok().body("vitrine is running")
}

async fn sign_in_handler(
    state: Data<AppState>,
    auth: BearerAuth,
) -> Result<HttpResponse, AppError> {
    let login = state
        .session
        .sign_in(state.workspace.store(), auth.token())
        .await?;

    let collections: Map<String, Value> = state
        .workspace
        .load_all(auth.token().trim())
        .await
        .into_iter()
        .map(|outcome| {
            let summary = match outcome.result {
                Ok(count) => json!({ "count": count }),
                Err(error) => json!({ "error": error.to_string() }),
            };
            (outcome.collection.name().to_string(), summary)
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({ "user": login, "collections": collections })))
}

async fn sign_out_handler(
    state: Data<AppState>,
    auth: BearerAuth,
) -> Result<HttpResponse, AppError> {
    session_token(&state, &auth)?;
    state.session.sign_out();
    Ok(HttpResponse::NoContent().finish())
}

async fn list_handler<T: Record>(
    state: Data<AppState>,
    auth: BearerAuth,
) -> Result<HttpResponse, AppError> {
    let token = session_token(&state, &auth)?;
    let items = state.workspace.load::<T>(token).await?;
    Ok(HttpResponse::Ok().json(items))
}

async fn create_handler<T: Record>(
    state: Data<AppState>,
    auth: BearerAuth,
    record: Json<T>,
) -> Result<HttpResponse, AppError> {
    let token = session_token(&state, &auth)?;
    let items = state.workspace.save(token, record.into_inner(), None).await?;
    state.site.invalidate();
    Ok(HttpResponse::Ok().json(items))
}

async fn update_handler<T: Record>(
    state: Data<AppState>,
    auth: BearerAuth,
    index: Path<usize>,
    record: Json<T>,
) -> Result<HttpResponse, AppError> {
    let token = session_token(&state, &auth)?;
    let items = state
        .workspace
        .save(token, record.into_inner(), Some(index.into_inner()))
        .await?;
    state.site.invalidate();
    Ok(HttpResponse::Ok().json(items))
}

async fn delete_handler<T: Record>(
    state: Data<AppState>,
    auth: BearerAuth,
    index: Path<usize>,
) -> Result<HttpResponse, AppError> {
    let token = session_token(&state, &auth)?;
    let removed: T = state.workspace.remove(token, index.into_inner()).await?;
    state.site.invalidate();
    let items = T::slot(&state.workspace).snapshot().doc;
    Ok(HttpResponse::Ok().json(json!({ "removed": removed, "items": items })))
}

async fn create_product_handler(
    state: Data<AppState>,
    auth: BearerAuth,
    submission: Json<ProductSubmission>,
) -> Result<HttpResponse, AppError> {
    let token = session_token(&state, &auth)?;
    let items = state
        .workspace
        .save_product(token, submission.into_inner(), None)
        .await?;
    state.site.invalidate();
    Ok(HttpResponse::Ok().json(items))
}

async fn update_product_handler(
    state: Data<AppState>,
    auth: BearerAuth,
    index: Path<usize>,
    submission: Json<ProductSubmission>,
) -> Result<HttpResponse, AppError> {
    let token = session_token(&state, &auth)?;
    let items = state
        .workspace
        .save_product(token, submission.into_inner(), Some(index.into_inner()))
        .await?;
    state.site.invalidate();
    Ok(HttpResponse::Ok().json(items))
}

async fn settings_handler(
    state: Data<AppState>,
    auth: BearerAuth,
) -> Result<HttpResponse, AppError> {
    let token = session_token(&state, &auth)?;
    let settings = state.workspace.load_settings(token).await?;
    Ok(HttpResponse::Ok().json(settings))
}

async fn save_settings_handler(
    state: Data<AppState>,
    auth: BearerAuth,
    settings: Json<SiteSettings>,
) -> Result<HttpResponse, AppError> {
    let token = session_token(&state, &auth)?;
    let settings = state
        .workspace
        .save_settings(token, settings.into_inner())
        .await?;
    state.site.invalidate();
    Ok(HttpResponse::Ok().json(settings))
}

#[derive(Deserialize)]
struct AssetRequest {
    path: String,
    content: String,
    message: Option<String>,
}

async fn asset_handler(
    state: Data<AppState>,
    auth: BearerAuth,
    asset: Json<AssetRequest>,
) -> Result<HttpResponse, AppError> {
    let token = session_token(&state, &auth)?;
    let AssetRequest {
        path,
        content,
        message,
    } = asset.into_inner();
    let bytes = decode_content(&content)?;
    let message = message.unwrap_or_else(|| format!("Upload {} from admin", path));
    let sha = state
        .workspace
        .upload_asset(token, &path, &bytes, &message)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "path": path, "sha": sha })))
}

async fn products_handler(
    state: Data<AppState>,
    query: Query<ProductQuery>,
) -> Result<HttpResponse, AppError> {
    let products: Vec<Product> = state.site.collection(Collection::Products).await?;
    Ok(HttpResponse::Ok().json(catalog_page(&products, &query)))
}

#[derive(Deserialize)]
struct ProjectsQuery {
    #[serde(default)]
    home: bool,
}

async fn projects_handler(
    state: Data<AppState>,
    query: Query<ProjectsQuery>,
) -> Result<HttpResponse, AppError> {
    let projects: Vec<Project> = state.site.collection(Collection::Projects).await?;
    if query.home {
        Ok(HttpResponse::Ok().json(home_projects(&projects)))
    } else {
        Ok(HttpResponse::Ok().json(projects))
    }
}

async fn project_handler(
    state: Data<AppState>,
    id: Path<String>,
) -> Result<HttpResponse, AppError> {
    let projects: Vec<Project> = state.site.collection(Collection::Projects).await?;
    let project = find_project(&projects, id.as_str())
        .ok_or_else(|| AppError::NotFound(format!("project \"{}\"", id.as_str())))?;
    Ok(HttpResponse::Ok().json(ProjectDetail::from(project)))
}

#[derive(Deserialize)]
struct ServicesQuery {
    #[serde(default)]
    variant: ServiceVariant,
    limit: Option<usize>,
}

async fn services_handler(
    state: Data<AppState>,
    query: Query<ServicesQuery>,
) -> Result<HttpResponse, AppError> {
    let services: Vec<Service> = state.site.collection(Collection::Services).await?;
    Ok(HttpResponse::Ok().json(service_cards(&services, query.variant, query.limit)))
}

async fn freebies_handler(state: Data<AppState>) -> Result<HttpResponse, AppError> {
    let freebies: Vec<Freebie> = state.site.collection(Collection::Freebies).await?;
    let cards: Vec<FreebieCard> = freebies.iter().map(FreebieCard::from).collect();
    Ok(HttpResponse::Ok().json(cards))
}

async fn testimonials_handler(
    state: Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let testimonials: Vec<Testimonial> = state.site.collection(Collection::Testimonials).await?;
    let settings = state
        .site
        .collection::<SiteSettings>(Collection::Settings)
        .await
        .unwrap_or_else(|error| {
            warn!("Using default settings: {}", error);
            SiteSettings::default()
        });
    Ok(HttpResponse::Ok().json(testimonial_feed(testimonials, &settings)))
}

async fn order_handler(query: Query<OrderQuery>) -> HttpResponse {
    HttpResponse::Ok().json(OrderSummary::from(query.into_inner()))
}

#[derive(Deserialize)]
struct FormQuery {
    store: Option<String>,
}

async fn form_handler(
    state: Data<AppState>,
    query: Query<FormQuery>,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    let fields: Fields = serde_urlencoded::from_bytes(&body)
        .map_err(|_| AppError::Validation("Malformed form body.".to_string()))?;
    let message = relay_form(&state.relay, &state.audit, query.store.as_deref(), &fields).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": message })))
}
