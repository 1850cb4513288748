use margin_core::models::{ActionType, AnnotationKind, EntityType};
use margin_core::util::{normalize_text_option, now_millis};
use margin_core::{Annotation, AnnotationId, AnnotationPatch, SyncClient};

use crate::cli::{AnnotationKindArg, CreateArgs, UpdateArgs};
use crate::commands::common::{open_queue, CliContext};
use crate::error::CliError;

pub async fn run_create(args: &CreateArgs, context: &CliContext) -> Result<(), CliError> {
    let annotation = build_annotation(args)?;
    let queue = open_queue(context).await?;
    let client = SyncClient::new(queue);

    let action_id = client.create_annotation(annotation.clone()).await?;
    tracing::debug!("Queued create {action_id} for annotation {}", annotation.id);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&annotation)?);
    } else {
        println!("{}", annotation.id);
    }
    Ok(())
}

pub async fn run_update(args: &UpdateArgs, context: &CliContext) -> Result<(), CliError> {
    let id = parse_annotation_id(&args.id)?;
    let mut patch = build_patch(args)?;
    patch.updated_at = Some(now_millis());

    let queue = open_queue(context).await?;
    let action_id = queue
        .enqueue_action(
            EntityType::Annotation,
            id.to_string(),
            ActionType::Update,
            Some(serde_json::to_value(&patch)?),
        )
        .await;
    println!("{action_id}");
    Ok(())
}

pub async fn run_delete(raw_id: &str, context: &CliContext) -> Result<(), CliError> {
    let id = parse_annotation_id(raw_id)?;
    let queue = open_queue(context).await?;
    let action_id = queue
        .enqueue_action(EntityType::Annotation, id.to_string(), ActionType::Delete, None)
        .await;
    println!("{action_id}");
    Ok(())
}

pub fn parse_annotation_id(raw: &str) -> Result<AnnotationId, CliError> {
    let trimmed = raw.trim();
    trimmed
        .parse()
        .map_err(|_| CliError::InvalidAnnotationId(trimmed.to_string()))
}

/// Build the annotation described by `margin annotate create`
pub fn build_annotation(args: &CreateArgs) -> Result<Annotation, CliError> {
    let document = args.document.trim();
    if document.is_empty() {
        return Err(CliError::InvalidGeometry(
            "document ID cannot be empty".to_string(),
        ));
    }

    let kind = match args.kind {
        AnnotationKindArg::Highlight | AnnotationKindArg::Explanation => {
            if !args.strokes.is_empty() {
                return Err(CliError::InvalidGeometry(
                    "--stroke only applies to drawings".to_string(),
                ));
            }
            if args.rects.is_empty() {
                return Err(CliError::InvalidGeometry(
                    "highlights and explanations need at least one --rect".to_string(),
                ));
            }
            if args.kind == AnnotationKindArg::Highlight {
                AnnotationKind::Highlight {
                    rects: args.rects.clone(),
                    selected_text: None,
                }
            } else {
                AnnotationKind::Explanation {
                    rects: args.rects.clone(),
                    prompt: None,
                }
            }
        }
        AnnotationKindArg::Drawing => {
            if !args.rects.is_empty() {
                return Err(CliError::InvalidGeometry(
                    "--rect does not apply to drawings".to_string(),
                ));
            }
            if args.strokes.is_empty() {
                return Err(CliError::InvalidGeometry(
                    "drawings need at least one --stroke".to_string(),
                ));
            }
            AnnotationKind::Drawing {
                strokes: args.strokes.clone(),
            }
        }
    };

    let mut annotation = Annotation::new(document, args.page, kind);
    annotation.content = normalize_text_option(args.content.clone());
    annotation.color = normalize_text_option(args.color.clone());
    Ok(annotation)
}

/// Build the partial update described by `margin annotate update`
pub fn build_patch(args: &UpdateArgs) -> Result<AnnotationPatch, CliError> {
    if !args.rects.is_empty() && !args.strokes.is_empty() {
        return Err(CliError::InvalidGeometry(
            "pass either --rect or --stroke, not both".to_string(),
        ));
    }

    let patch = AnnotationPatch {
        page_number: args.page,
        content: normalize_text_option(args.content.clone()),
        color: normalize_text_option(args.color.clone()),
        rects: (!args.rects.is_empty()).then(|| args.rects.clone()),
        strokes: (!args.strokes.is_empty()).then(|| args.strokes.clone()),
        updated_at: None,
    };
    if patch.is_empty() {
        return Err(CliError::EmptyUpdate);
    }
    Ok(patch)
}
