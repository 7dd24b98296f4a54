use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::{
    core::hosting::{decode_content, ContentStore},
    error::AppError,
    types::{Collection, Freebie, Product, Project, Record, Service, SiteSettings, Testimonial},
};

pub const PRODUCT_IMAGE_DIR: &str = "images/products";
pub const FALLBACK_PRODUCT_IMAGE: &str = "images/products/doc.jpg";

/// Last known content of a collection file and the hash it was read or
/// written at.
#[derive(Clone, Debug, Default)]
pub struct Loaded<D> {
    pub doc: D,
    pub sha: Option<String>,
    pub loaded: bool,
}

pub struct Slot<D> {
    collection: Collection,
    state: Mutex<Loaded<D>>,
    busy: AtomicBool,
}

/// Held while a mutation of one collection is in flight.
pub struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<D: Clone + Default> Slot<D> {
    fn new(collection: Collection) -> Self {
        Slot {
            collection,
            state: Mutex::new(Loaded::default()),
            busy: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> Loaded<D> {
        self.state().clone()
    }

    fn replace(&self, doc: D, sha: Option<String>) {
        *self.state() = Loaded {
            doc,
            sha,
            loaded: true,
        };
    }

    fn begin(&self) -> Result<BusyGuard<'_>, AppError> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map(|_| BusyGuard(&self.busy))
            .map_err(|_| AppError::Busy(self.collection.name()))
    }

    fn state(&self) -> MutexGuard<'_, Loaded<D>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AssetUpload {
    pub file_name: String,
    /// Base64 encoded file body.
    pub content: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProductSubmission {
    pub product: Product,
    #[serde(default)]
    pub upload: Option<AssetUpload>,
}

/// Outcome of one collection in the initial load.
#[derive(Debug)]
pub struct LoadOutcome {
    pub collection: Collection,
    pub result: Result<usize, AppError>,
}

/// Operator-side copy of every collection, written back through a
/// [`ContentStore`] with the hash of the last read.
pub struct Workspace {
    store: Arc<dyn ContentStore + Send + Sync>,
    pub products: Slot<Vec<Product>>,
    pub projects: Slot<Vec<Project>>,
    pub freebies: Slot<Vec<Freebie>>,
    pub services: Slot<Vec<Service>>,
    pub testimonials: Slot<Vec<Testimonial>>,
    pub settings: Slot<SiteSettings>,
}

impl Workspace {
    pub fn new(store: Arc<dyn ContentStore + Send + Sync>) -> Self {
        Workspace {
            store,
            products: Slot::new(Collection::Products),
            projects: Slot::new(Collection::Projects),
            freebies: Slot::new(Collection::Freebies),
            services: Slot::new(Collection::Services),
            testimonials: Slot::new(Collection::Testimonials),
            settings: Slot::new(Collection::Settings),
        }
    }

    pub fn store(&self) -> &(dyn ContentStore + Send + Sync) {
        self.store.as_ref()
    }

    pub async fn load<T: Record>(&self, token: &str) -> Result<Vec<T>, AppError> {
        let path = T::COLLECTION.path();
        let (items, sha) = match self.store.fetch(token, path).await? {
            Some(file) => (decode_collection(path, &file.content)?, Some(file.sha)),
            None => (Vec::new(), None),
        };
        info!("Loaded {} {}", items.len(), T::COLLECTION);
        T::slot(self).replace(items.clone(), sha);
        Ok(items)
    }

    pub async fn load_settings(&self, token: &str) -> Result<SiteSettings, AppError> {
        let path = Collection::Settings.path();
        let (settings, sha) = match self.store.fetch(token, path).await? {
            Some(file) => (decode_settings(path, &file.content)?, Some(file.sha)),
            None => (SiteSettings::default(), None),
        };
        self.settings.replace(settings.clone(), sha);
        Ok(settings)
    }

    /// Loads every collection concurrently. A failing collection does not
    /// hold back the others.
    pub async fn load_all(&self, token: &str) -> Vec<LoadOutcome> {
        let (products, projects, freebies, services, testimonials, settings) = futures::join!(
            self.load::<Product>(token),
            self.load::<Project>(token),
            self.load::<Freebie>(token),
            self.load::<Service>(token),
            self.load::<Testimonial>(token),
            self.load_settings(token),
        );

        let outcomes = vec![
            outcome(Collection::Products, products.map(|items| items.len())),
            outcome(Collection::Projects, projects.map(|items| items.len())),
            outcome(Collection::Freebies, freebies.map(|items| items.len())),
            outcome(Collection::Services, services.map(|items| items.len())),
            outcome(Collection::Testimonials, testimonials.map(|items| items.len())),
            outcome(Collection::Settings, settings.map(|_| 1)),
        ];
        for failed in outcomes.iter().filter(|outcome| outcome.result.is_err()) {
            if let Err(error) = &failed.result {
                error!("Failed to load {}: {}", failed.collection, error);
            }
        }
        outcomes
    }

    /// Appends `record`, or replaces the record at `index`.
    pub async fn save<T: Record>(
        &self,
        token: &str,
        mut record: T,
        index: Option<usize>,
    ) -> Result<Vec<T>, AppError> {
        record.normalize();
        record.validate()?;

        let slot = T::slot(self);
        let _guard = slot.begin()?;
        let current = slot.snapshot();
        let label = record.label().to_string();
        let updated = with_saved(&current.doc, record, index, T::COLLECTION)?;
        let message = match index {
            Some(_) => format!("Update {} from admin", T::COLLECTION),
            None => format!("Add to {} from admin", T::COLLECTION),
        };

        let updated = self
            .commit(slot, token, updated, current.sha, &message)
            .await?;
        info!("Saved \"{}\" in {}", label, T::COLLECTION);
        Ok(updated)
    }

    /// Deletes the record at `index` and returns it. Removing the featured
    /// project also clears the reference in the site settings.
    pub async fn remove<T: Record>(&self, token: &str, index: usize) -> Result<T, AppError> {
        let slot = T::slot(self);
        let removed = {
            let _guard = slot.begin()?;
            let current = slot.snapshot();
            let (updated, removed) = with_removed(&current.doc, index, T::COLLECTION)?;
            let message = format!("Remove from {} from admin", T::COLLECTION);
            self.commit(slot, token, updated, current.sha, &message)
                .await?;
            removed
        };
        info!("Removed \"{}\" from {}", removed.label(), T::COLLECTION);

        if let Some(key) = removed.featured_key() {
            if let Err(error) = self.release_featured(token, key).await {
                error!(
                    "\"{}\" was removed but settings still point at it: {}",
                    key, error
                );
            }
        }
        Ok(removed)
    }

    /// Saves the site settings. A featured project that is not among the
    /// loaded projects is dropped first.
    pub async fn save_settings(
        &self,
        token: &str,
        mut settings: SiteSettings,
    ) -> Result<SiteSettings, AppError> {
        settings.normalize();

        let projects = self.projects.snapshot();
        if projects.loaded && settings.reconcile(&projects.doc) {
            warn!("Featured project no longer exists, clearing it");
        }

        let _guard = self.settings.begin()?;
        let current = self.settings.snapshot();
        self.commit(
            &self.settings,
            token,
            settings,
            current.sha,
            "Update settings from admin",
        )
        .await
    }

    /// Uploads a binary asset, replacing whatever is stored at `path`.
    pub async fn upload_asset(
        &self,
        token: &str,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<String, AppError> {
        let path = path.trim().trim_start_matches('/');
        if path.is_empty() {
            return Err(AppError::Validation("An asset path is required.".to_string()));
        }

        let existing = self.store.fetch(token, path).await?.map(|file| file.sha);
        let sha = self
            .store
            .put(token, path, content, existing.as_deref(), message)
            .await?;
        info!("Uploaded {} ({} bytes)", path, content.len());
        Ok(sha)
    }

    /// Saves a product, uploading its image first when one is attached.
    /// The two writes are not atomic: a failed product update leaves the
    /// uploaded image in place.
    pub async fn save_product(
        &self,
        token: &str,
        submission: ProductSubmission,
        index: Option<usize>,
    ) -> Result<Vec<Product>, AppError> {
        let ProductSubmission {
            mut product,
            upload,
        } = submission;
        product.image = resolve_image_path(&product.image, upload.as_ref());
        product.normalize();
        product.validate()?;

        if let Some(upload) = upload {
            let bytes = decode_content(&upload.content)?;
            let message = format!("Update image {}", upload.file_name);
            self.upload_asset(token, &product.image, &bytes, &message)
                .await?;
        }
        self.save(token, product, index).await
    }

    async fn release_featured(&self, token: &str, project_id: &str) -> Result<bool, AppError> {
        let mut settings = self.load_settings(token).await?;
        if !settings.release(project_id) {
            return Ok(false);
        }

        let _guard = self.settings.begin()?;
        let current = self.settings.snapshot();
        self.commit(
            &self.settings,
            token,
            settings,
            current.sha,
            "Clear featured project from admin",
        )
        .await?;
        info!("Cleared featured project \"{}\"", project_id);
        Ok(true)
    }

    /// Writes `doc` against `sha` and, only once the write went through,
    /// makes it the local state.
    async fn commit<D: Serialize + Clone + Default>(
        &self,
        slot: &Slot<D>,
        token: &str,
        doc: D,
        sha: Option<String>,
        message: &str,
    ) -> Result<D, AppError> {
        let path = slot.collection.path();
        let body = serde_json::to_vec_pretty(&doc).map_err(|error| AppError::malformed(path, error))?;
        let sha = self
            .store
            .put(token, path, &body, sha.as_deref(), message)
            .await?;
        slot.replace(doc.clone(), Some(sha));
        Ok(doc)
    }
}

fn outcome(collection: Collection, result: Result<usize, AppError>) -> LoadOutcome {
    LoadOutcome { collection, result }
}

pub fn with_saved<T: Clone>(
    items: &[T],
    record: T,
    index: Option<usize>,
    collection: Collection,
) -> Result<Vec<T>, AppError> {
    let mut updated = items.to_vec();
    match index {
        Some(index) => {
            let slot = updated
                .get_mut(index)
                .ok_or_else(|| AppError::NotFound(format!("{} #{}", collection, index)))?;
            *slot = record;
        }
        None => updated.push(record),
    }
    Ok(updated)
}

pub fn with_removed<T: Clone>(
    items: &[T],
    index: usize,
    collection: Collection,
) -> Result<(Vec<T>, T), AppError> {
    if index >= items.len() {
        return Err(AppError::NotFound(format!("{} #{}", collection, index)));
    }
    let mut updated = items.to_vec();
    let removed = updated.remove(index);
    Ok((updated, removed))
}

/// Reads a collection file. Anything but a top-level array reads as empty.
pub fn decode_collection<T: DeserializeOwned>(path: &str, bytes: &[u8]) -> Result<Vec<T>, AppError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|error| AppError::malformed(path, error))?;
    if !value.is_array() {
        warn!("{} does not hold an array, reading it as empty", path);
        return Ok(Vec::new());
    }
    serde_json::from_value(value).map_err(|error| AppError::malformed(path, error))
}

pub fn decode_settings(path: &str, bytes: &[u8]) -> Result<SiteSettings, AppError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|error| AppError::malformed(path, error))?;
    if !value.is_object() {
        warn!("{} does not hold an object, using default settings", path);
        return Ok(SiteSettings::default());
    }
    serde_json::from_value(value).map_err(|error| AppError::malformed(path, error))
}

/// Explicit path first, then the uploaded file name, then the placeholder.
pub fn resolve_image_path(custom: &str, upload: Option<&AssetUpload>) -> String {
    let custom = custom.trim();
    if !custom.is_empty() {
        return custom.to_string();
    }
    upload
        .and_then(|upload| Path::new(upload.file_name.trim()).file_name())
        .and_then(|name| name.to_str())
        .map(|name| format!("{}/{}", PRODUCT_IMAGE_DIR, name))
        .unwrap_or_else(|| FALLBACK_PRODUCT_IMAGE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hosting::{encode_content, MemoryStore};

    const TOKEN: &str = "operator-token";

    fn product(reference: &str, name: &str) -> Product {
        Product {
            reference: reference.to_string(),
            name: name.to_string(),
            kind: "STL".to_string(),
            price: "12,00 €".to_string(),
            description: format!("{} description", name),
            ..Product::default()
        }
    }

    fn project(id: &str) -> Project {
        Project {
            id: id.to_string(),
            title: format!("Project {}", id),
            description: "Custom part".to_string(),
            ..Project::default()
        }
    }

    fn seed_json<T: Serialize>(store: &MemoryStore, path: &str, value: &T) -> String {
        store.seed(path, serde_json::to_vec_pretty(value).unwrap())
    }

    fn stored<T: DeserializeOwned>(store: &MemoryStore, path: &str) -> T {
        serde_json::from_slice(&store.file(path).unwrap().content).unwrap()
    }

    fn setup() -> (Arc<MemoryStore>, Workspace) {
        let store = Arc::new(MemoryStore::new(TOKEN));
        let workspace = Workspace::new(store.clone());
        (store, workspace)
    }

    #[test]
    fn saving_at_an_index_replaces_instead_of_appending() {
        let items = vec![1, 2, 3];
        assert_eq!(
            with_saved(&items, 9, Some(1), Collection::Products).unwrap(),
            vec![1, 9, 3]
        );
        assert_eq!(
            with_saved(&items, 9, None, Collection::Products).unwrap(),
            vec![1, 2, 3, 9]
        );
        assert!(matches!(
            with_saved(&items, 9, Some(3), Collection::Products),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn removing_keeps_the_others_in_order() {
        let items = vec!["a", "b", "c", "d"];
        let (updated, removed) = with_removed(&items, 1, Collection::Projects).unwrap();
        assert_eq!(updated, vec!["a", "c", "d"]);
        assert_eq!(removed, "b");
        assert!(with_removed(&items, 4, Collection::Projects).is_err());
    }

    #[test]
    fn non_array_collection_reads_as_empty() {
        let items: Vec<Product> = decode_collection("data/products.json", b"{\"a\":1}").unwrap();
        assert!(items.is_empty());
        assert!(decode_collection::<Product>("data/products.json", b"[{").is_err());
    }

    #[test]
    fn image_path_resolution_order() {
        let upload = AssetUpload {
            file_name: "../clip.jpg".to_string(),
            content: String::new(),
        };
        assert_eq!(resolve_image_path(" images/custom.png ", Some(&upload)), "images/custom.png");
        assert_eq!(resolve_image_path("", Some(&upload)), "images/products/clip.jpg");
        assert_eq!(resolve_image_path("", None), FALLBACK_PRODUCT_IMAGE);
    }

    #[actix_web::test]
    async fn invalid_record_leaves_store_untouched() {
        let (store, workspace) = setup();
        let sha = seed_json(&*store, "data/products.json", &vec![product("P-1", "Clip")]);
        workspace.load::<Product>(TOKEN).await.unwrap();

        let error = workspace
            .save(TOKEN, product("", "Nameless"), None)
            .await
            .unwrap_err();
        assert!(matches!(error, AppError::Validation(_)));
        assert_eq!(store.file("data/products.json").unwrap().sha, sha);
        assert_eq!(workspace.products.snapshot().doc.len(), 1);
    }

    #[actix_web::test]
    async fn edit_replaces_the_selected_record() {
        let (store, workspace) = setup();
        seed_json(
            &*store,
            "data/products.json",
            &vec![product("P-1", "Clip"), product("P-2", "Hook"), product("P-3", "Knob")],
        );
        workspace.load::<Product>(TOKEN).await.unwrap();

        workspace
            .save(TOKEN, product("P-2", "Hook v2"), Some(1))
            .await
            .unwrap();

        let saved: Vec<Product> = stored(&store, "data/products.json");
        let names: Vec<&str> = saved.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Clip", "Hook v2", "Knob"]);
        assert_eq!(
            workspace.products.snapshot().sha,
            Some(store.file("data/products.json").unwrap().sha)
        );
    }

    #[actix_web::test]
    async fn first_save_creates_the_file() {
        let (store, workspace) = setup();
        assert!(workspace.load::<Testimonial>(TOKEN).await.unwrap().is_empty());

        let testimonial = Testimonial {
            quote: " Fast and precise. ".to_string(),
            author: "Camille".to_string(),
            role: String::new(),
        };
        workspace.save(TOKEN, testimonial, None).await.unwrap();

        let saved: Vec<Testimonial> = stored(&store, "data/testimonials.json");
        assert_eq!(saved[0].quote, "Fast and precise.");
    }

    #[actix_web::test]
    async fn stale_hash_is_rejected_and_local_state_kept() {
        let (store, workspace) = setup();
        seed_json(&*store, "data/projects.json", &vec![project("p1")]);
        workspace.load::<Project>(TOKEN).await.unwrap();
        let before = workspace.projects.snapshot();

        // Someone else edits the file after our read.
        seed_json(&*store, "data/projects.json", &vec![project("p1"), project("other")]);

        let error = workspace.save(TOKEN, project("p2"), None).await.unwrap_err();
        assert!(matches!(error, AppError::Hosting { status: Some(409), .. }));

        let after = workspace.projects.snapshot();
        assert_eq!(after.doc, before.doc);
        assert_eq!(after.sha, before.sha);
        let remote: Vec<Project> = stored(&store, "data/projects.json");
        assert_eq!(remote.len(), 2);
    }

    #[actix_web::test]
    async fn removing_the_featured_project_clears_settings() {
        let (store, workspace) = setup();
        seed_json(&*store, "data/projects.json", &vec![project("p1"), project("p2"), project("p3")]);
        seed_json(
            &*store,
            "data/settings.json",
            &SiteSettings {
                featured_project: Some("p2".to_string()),
                ..SiteSettings::default()
            },
        );
        workspace.load::<Project>(TOKEN).await.unwrap();

        let removed: Project = workspace.remove(TOKEN, 1).await.unwrap();
        assert_eq!(removed.id, "p2");

        let projects: Vec<Project> = stored(&store, "data/projects.json");
        let ids: Vec<&str> = projects.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p3"]);

        let settings: SiteSettings = stored(&store, "data/settings.json");
        assert_eq!(settings.featured_project, None);
        assert_eq!(workspace.settings.snapshot().doc.featured_project, None);
    }

    #[actix_web::test]
    async fn removing_another_project_keeps_settings() {
        let (store, workspace) = setup();
        seed_json(&*store, "data/projects.json", &vec![project("p1"), project("p2")]);
        let settings_sha = seed_json(
            &*store,
            "data/settings.json",
            &SiteSettings {
                featured_project: Some("p2".to_string()),
                ..SiteSettings::default()
            },
        );
        workspace.load::<Project>(TOKEN).await.unwrap();

        workspace.remove::<Project>(TOKEN, 0).await.unwrap();
        assert_eq!(store.file("data/settings.json").unwrap().sha, settings_sha);
    }

    #[actix_web::test]
    async fn saving_settings_drops_unknown_featured_project() {
        let (store, workspace) = setup();
        seed_json(&*store, "data/projects.json", &vec![project("p1")]);
        workspace.load_all(TOKEN).await;

        let saved = workspace
            .save_settings(
                TOKEN,
                SiteSettings {
                    featured_project: Some("deleted".to_string()),
                    rotate_testimonials: true,
                    testimonial_interval: 5000,
                },
            )
            .await
            .unwrap();
        assert_eq!(saved.featured_project, None);
        let remote: SiteSettings = stored(&store, "data/settings.json");
        assert_eq!(remote.testimonial_interval, 5000);
    }

    #[actix_web::test]
    async fn any_rotation_interval_is_stored_as_sent() {
        let (store, workspace) = setup();
        let saved = workspace
            .save_settings(
                TOKEN,
                SiteSettings {
                    testimonial_interval: 10,
                    ..SiteSettings::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(saved.testimonial_interval, 10);
        let remote: SiteSettings = stored(&store, "data/settings.json");
        assert_eq!(remote.testimonial_interval, 10);
    }

    #[actix_web::test]
    async fn product_image_is_uploaded_before_the_product() {
        let (store, workspace) = setup();
        store.seed("images/products/clip.jpg", vec![0u8; 4]);
        workspace.load::<Product>(TOKEN).await.unwrap();

        let submission = ProductSubmission {
            product: product("P-9", "Clip"),
            upload: Some(AssetUpload {
                file_name: "clip.jpg".to_string(),
                content: encode_content(&[1, 2, 3]),
            }),
        };
        let saved = workspace.save_product(TOKEN, submission, None).await.unwrap();

        assert_eq!(saved[0].image, "images/products/clip.jpg");
        assert_eq!(store.file("images/products/clip.jpg").unwrap().content, vec![1, 2, 3]);
    }

    #[actix_web::test]
    async fn invalid_product_skips_the_upload() {
        let (store, workspace) = setup();
        let submission = ProductSubmission {
            product: product("P-9", ""),
            upload: Some(AssetUpload {
                file_name: "clip.jpg".to_string(),
                content: encode_content(&[1]),
            }),
        };
        assert!(workspace.save_product(TOKEN, submission, None).await.is_err());
        assert!(store.file("images/products/clip.jpg").is_none());
    }

    #[actix_web::test]
    async fn load_all_reports_each_collection() {
        let (store, workspace) = setup();
        seed_json(&*store, "data/products.json", &vec![product("P-1", "Clip")]);
        store.seed("data/services.json", "[not json");

        let outcomes = workspace.load_all(TOKEN).await;
        assert_eq!(outcomes.len(), 6);
        for outcome in outcomes {
            match outcome.collection {
                Collection::Products => assert_eq!(outcome.result.unwrap(), 1),
                Collection::Services => assert!(outcome.result.is_err()),
                Collection::Settings => assert_eq!(outcome.result.unwrap(), 1),
                _ => assert_eq!(outcome.result.unwrap(), 0),
            }
        }
    }

    #[test]
    fn second_mutation_of_a_collection_is_busy() {
        let (_store, workspace) = setup();
        let guard = workspace.products.begin().unwrap();
        assert!(matches!(workspace.products.begin(), Err(AppError::Busy("products"))));
        assert!(workspace.projects.begin().is_ok());
        drop(guard);
        assert!(workspace.products.begin().is_ok());
    }
}
