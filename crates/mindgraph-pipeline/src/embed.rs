//! Attach embeddings to items, intents and goal fields.
//!
//! Only missing embeddings are requested; everything already embedded is
//! left untouched so re-runs over cached data are free.

use mindgraph_core::{Embedder, Field, Goal, HasEmbeddingFields, Intent, Item};
use tracing::debug;

use crate::error::{PipelineError, Result};

async fn embed_texts(embedder: &dyn Embedder, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let vectors = embedder.embed(&texts).await.map_err(PipelineError::oracle)?;
    if vectors.len() != texts.len() {
        return Err(PipelineError::Oracle(format!(
            "requested {} embeddings, received {}",
            texts.len(),
            vectors.len()
        )));
    }
    Ok(vectors)
}

/// Embed item text; returns how many items were embedded.
pub async fn embed_items(embedder: &dyn Embedder, items: &mut [Item]) -> Result<usize> {
    let pending: Vec<usize> = (0..items.len())
        .filter(|i| items[*i].embedding.is_none())
        .collect();
    let texts = pending.iter().map(|i| items[*i].text.clone()).collect();
    let vectors = embed_texts(embedder, texts).await?;
    for (i, vector) in pending.iter().zip(vectors) {
        items[*i].embedding = Some(vector);
    }
    debug!("Embedded {} of {} items", pending.len(), items.len());
    Ok(pending.len())
}

pub async fn embed_intents(embedder: &dyn Embedder, intents: &mut [Intent]) -> Result<usize> {
    let mut items: Vec<Item> = intents.iter().map(|i| i.item.clone()).collect();
    let count = embed_items(embedder, &mut items).await?;
    for (intent, item) in intents.iter_mut().zip(items) {
        intent.item.embedding = item.embedding;
    }
    Ok(count)
}

/// Embed every goal field that has text but no vector. The text embedding
/// lands on the goal's item so the distance calculator can use it.
pub async fn embed_goal_fields(embedder: &dyn Embedder, goals: &mut [Goal]) -> Result<usize> {
    let pending: Vec<(usize, Field, String)> = goals
        .iter()
        .enumerate()
        .flat_map(|(i, g)| {
            g.missing_field_embeddings()
                .into_iter()
                .map(move |(field, text)| (i, field, text))
        })
        .collect();
    let texts = pending.iter().map(|(_, _, t)| t.clone()).collect();
    let vectors = embed_texts(embedder, texts).await?;

    for ((i, field, _), vector) in pending.iter().zip(vectors) {
        let goal = &mut goals[*i];
        match field {
            Field::Text => goal.item.embedding = Some(vector),
            other => {
                goal.field_embeddings.insert(*other, vector);
            }
        }
    }
    debug!("Embedded {} goal fields across {} goals", pending.len(), goals.len());
    Ok(pending.len())
}
