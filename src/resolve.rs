use std::collections::HashMap;

use crate::error::Result;
use crate::models::FolderPath;
use crate::naming::safe_name;
use crate::store::{ListPattern, MailStore};

/// Maps each feed URL to the one folder that holds its entries.
///
/// Results are cached for the lifetime of the resolver, which the update
/// cycle creates fresh on every run.
#[derive(Debug)]
pub struct FeedPathResolver {
    root: FolderPath,
    resolved: HashMap<String, FolderPath>,
}

impl FeedPathResolver {
    pub fn new(root: FolderPath) -> Self {
        FeedPathResolver {
            root,
            resolved: HashMap::new(),
        }
    }

    /// Folder for `url`.
    ///
    /// `candidates` are the folders holding surviving commands for this URL.
    /// The deepest one below the root is the feed's folder. Without one, the
    /// root's child named after the feed title is used, created if missing.
    pub async fn resolve<S: MailStore>(
        &mut self,
        store: &S,
        url: &str,
        candidates: &[FolderPath],
        title: &str,
    ) -> Result<FolderPath> {
        if let Some(folder) = self.resolved.get(url) {
            return Ok(folder.clone());
        }

        let folder = match self.deepest_candidate(candidates) {
            Some(folder) => folder,
            None => self.title_folder(store, title).await?,
        };
        log::debug!("Feed {} resolves to {}", url, folder);
        self.resolved.insert(url.to_string(), folder.clone());
        Ok(folder)
    }

    fn deepest_candidate(&self, candidates: &[FolderPath]) -> Option<FolderPath> {
        // First-seen wins among equally deep candidates.
        candidates
            .iter()
            .filter(|c| c.is_descendant_of(&self.root))
            .fold(None::<&FolderPath>, |best, c| match best {
                Some(b) if c.cmp_depth(b) != std::cmp::Ordering::Greater => Some(b),
                _ => Some(c),
            })
            .cloned()
    }

    async fn title_folder<S: MailStore>(&self, store: &S, title: &str) -> Result<FolderPath> {
        let name = safe_name(title, self.root.delimiter());
        let existing = store.list(&self.root, ListPattern::Named(&name)).await?;
        if let Some(folder) = existing.into_iter().next() {
            return Ok(folder);
        }

        let folder = self.root.child(&name);
        log::info!("Creating feed folder {}", folder);
        store.create(&folder).await?;
        store.subscribe(&folder).await?;
        Ok(folder)
    }
}
