use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use recipe_ingest::providers::FakeProvider;
use recipe_ingest::{
    CanonicalIngredient, ImportConfig, ImportError, ImportStore, ItemStatus, JobStatus,
    MemoryStore, OcrEngine, OcrService, RecipeImporter, SourceInput, SourceReference, SourceType,
};
use serde_json::json;
use uuid::Uuid;

fn test_config() -> ImportConfig {
    let mut config = ImportConfig::default();
    config.retry.initial_delay_ms = 5;
    config.timeouts.fetch_secs = 5;
    config.timeouts.ai_secs = 5;
    config
}

fn catalog() -> Vec<CanonicalIngredient> {
    vec![
        CanonicalIngredient::new("egg", &[]),
        CanonicalIngredient::new("milk", &[]),
        CanonicalIngredient::new("all-purpose flour", &["flour"]),
        CanonicalIngredient::new("water", &[]),
    ]
}

#[tokio::test]
async fn test_spreadsheet_rows_become_items() {
    let mut server = mockito::Server::new_async().await;
    let page = server
        .mock("GET", "/crepes")
        .with_status(200)
        .with_body(
            r#"<html><head><script type="application/ld+json">
            {"@type": "Recipe", "name": "Crepes",
             "recipeIngredient": ["2 eggs", "1 cup milk", "1 cup flour"],
             "recipeInstructions": "Whisk. Fry thin."}
            </script></head><body></body></html>"#,
        )
        .expect(1)
        .create_async()
        .await;

    let csv = format!(
        "Title,Ingredients,Instructions,Source URL\n\
         Pancakes,2 eggs; 1 cup milk; 2 cups flour,Mix | Fry,\n\
         ,,,{}/crepes\n\
         ,,,\n\
         Toast,,Toast the bread,\n",
        server.url()
    );

    let store = Arc::new(MemoryStore::new());
    let importer = RecipeImporter::builder()
        .config(test_config())
        .store(store.clone())
        .catalog(catalog())
        .without_ai()
        .build()
        .unwrap();

    let job = importer
        .start_import(
            SourceInput::Spreadsheet {
                filename: Some("family.csv".to_string()),
                bytes: csv.into_bytes(),
            },
            Uuid::new_v4(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(job.source_type, SourceType::Spreadsheet);
    assert_eq!(job.source_filename.as_deref(), Some("family.csv"));
    // the blank row is not an item
    assert_eq!(job.total_items, 3);

    importer.wait_idle().await;
    page.assert_async().await;

    let items = importer.list_items(job.id).await.unwrap();
    let rows: Vec<usize> = items
        .iter()
        .map(|item| match &item.source_reference {
            SourceReference::Row { index, .. } => *index,
            other => panic!("unexpected reference {:?}", other),
        })
        .collect();
    assert_eq!(rows, vec![1, 2, 4]);

    assert_eq!(items[0].status, ItemStatus::Completed);
    assert_eq!(items[0].extractor_used.as_deref(), Some("spreadsheet_row"));
    assert_eq!(items[1].status, ItemStatus::Completed);
    assert_eq!(items[1].extractor_used.as_deref(), Some("structured_data"));
    assert_eq!(items[2].status, ItemStatus::Failed);

    let crepes = store
        .get_recipe(items[1].created_recipe_id.unwrap())
        .await
        .unwrap();
    assert_eq!(crepes.title, "Crepes");
    assert!(crepes.source_url.unwrap().ends_with("/crepes"));

    let job = importer.get_job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.succeeded_items, 2);
    assert_eq!(job.failed_items, 1);
    assert_eq!(store.recipe_count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_spreadsheet_without_rows_is_rejected() {
    let importer = RecipeImporter::builder()
        .config(test_config())
        .without_ai()
        .build()
        .unwrap();

    let err = importer
        .start_import(
            SourceInput::Spreadsheet {
                filename: None,
                bytes: b"title,ingredients\n".to_vec(),
            },
            Uuid::new_v4(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::InvalidSource(_)));
}

/// Returns a different page of text for each image
struct ScannedBook;

#[async_trait]
impl OcrEngine for ScannedBook {
    async fn extract_text(&self, image: &[u8]) -> Result<String, ImportError> {
        match image {
            b"page-1" => Ok("# Flatbread\n\n- 2 cups flour\n- 1 cup water\n\nKnead, then bake.".to_string()),
            b"page-2" => Ok("Index\n\nFlatbread .... 1".to_string()),
            _ => Err(ImportError::ocr("unreadable page", false)),
        }
    }
}

#[tokio::test]
async fn test_scanned_pages_are_read_with_ocr() {
    let llm = Arc::new(
        FakeProvider::with_response(
            "Flatbread ....",
            json!({"error": "The text is an index, not a recipe"}),
        )
        .and_response(
            "Knead, then bake",
            json!({
                "title": "Flatbread",
                "ingredients": ["2 cups flour", "1 cup water"],
                "instructions": ["Knead", "Bake"],
                "error": null
            }),
        )
        .with_cost(0.75),
    );
    let ocr = Arc::new(OcrService::with_engine(
        Arc::new(ScannedBook),
        Duration::from_secs(1),
    ));

    let store = Arc::new(MemoryStore::new());
    let importer = RecipeImporter::builder()
        .config(test_config())
        .store(store.clone())
        .catalog(catalog())
        .provider(llm.clone())
        .ocr(ocr)
        .build()
        .unwrap();

    let job = importer
        .start_import(
            SourceInput::ScannedPages {
                filename: Some("grandmas-book.pdf".to_string()),
                pages: vec![b"page-1".to_vec(), b"page-2".to_vec()],
            },
            Uuid::new_v4(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(job.total_items, 2);
    importer.wait_idle().await;

    let items = importer.list_items(job.id).await.unwrap();
    assert!(matches!(
        items[0].source_reference,
        SourceReference::Page { number: 1, .. }
    ));
    assert_eq!(items[0].status, ItemStatus::Completed);
    assert_eq!(items[0].extractor_used.as_deref(), Some("ai_text"));

    assert_eq!(items[1].status, ItemStatus::Failed);
    assert_eq!(items[1].error_code.as_deref(), Some("not_a_recipe"));

    let job = importer.get_job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(llm.calls(), 2);
    assert_eq!(job.total_ai_cost_cents, 1.5);
    assert_eq!(store.recipe_count().await.unwrap(), 1);
}

/// One page of PDF text, the way a word processor exports a recipe card
fn typed_recipe_pdf(line: &str) -> Vec<u8> {
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let content = format!("BT /F1 12 Tf 50 700 Td ({}) Tj ET", line);
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// Fails the test if anything tries to OCR a page
struct NoOcr;

#[async_trait]
impl OcrEngine for NoOcr {
    async fn extract_text(&self, _image: &[u8]) -> Result<String, ImportError> {
        panic!("a page with a text layer went through OCR");
    }
}

#[tokio::test]
async fn test_pdf_text_layer_skips_ocr() {
    let llm = Arc::new(
        FakeProvider::with_response(
            "Flatbread",
            json!({
                "title": "Flatbread",
                "ingredients": ["2 cups flour", "1 cup water"],
                "instructions": ["Knead", "Bake"],
                "error": null
            }),
        )
        .with_cost(0.5),
    );
    let store = Arc::new(MemoryStore::new());
    let importer = RecipeImporter::builder()
        .config(test_config())
        .store(store.clone())
        .catalog(catalog())
        .provider(llm.clone())
        .ocr(Arc::new(OcrService::with_engine(
            Arc::new(NoOcr),
            Duration::from_secs(1),
        )))
        .build()
        .unwrap();

    let job = importer
        .start_import(
            SourceInput::Pdf {
                filename: Some("flatbread.pdf".to_string()),
                bytes: typed_recipe_pdf("Flatbread: 2 cups flour, 1 cup water. Knead, then bake."),
            },
            Uuid::new_v4(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(job.source_type, SourceType::Pdf);
    assert_eq!(job.total_items, 1);
    importer.wait_idle().await;

    let items = importer.list_items(job.id).await.unwrap();
    assert!(matches!(
        items[0].source_reference,
        SourceReference::PageText { number: 1, .. }
    ));
    assert_eq!(items[0].status, ItemStatus::Completed);
    assert_eq!(items[0].extractor_used.as_deref(), Some("ai_text"));
    assert_eq!(store.recipe_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_unreadable_pdf_is_rejected() {
    let importer = RecipeImporter::builder()
        .config(test_config())
        .without_ai()
        .build()
        .unwrap();

    let err = importer
        .start_import(
            SourceInput::Pdf {
                filename: Some("broken.pdf".to_string()),
                bytes: b"%PDF-1.5 truncated".to_vec(),
            },
            Uuid::new_v4(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::InvalidSource(_)));
}
