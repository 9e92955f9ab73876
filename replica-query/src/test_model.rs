//! Small bookshop model and dataset for unit tests.

use crate::eval::Dataset;
use replica_core::{Cardinality, Column, Definition, Element, Expr, Model, Row, Select};
use serde_json::json;

pub fn bookshop() -> Model {
    Model::new()
        .with_definition(
            Definition::entity("test.Authors")
                .with_keys(&["ID"])
                .with_columns(&["name"])
                .with_element(Element::association(
                    "books",
                    "test.Books",
                    &[("ID", "author_ID")],
                    Cardinality::Many,
                )),
        )
        .with_definition(
            Definition::entity("test.Books")
                .with_keys(&["ID"])
                .with_columns(&["title", "stock", "author_ID"])
                .with_element(Element::association(
                    "author",
                    "test.Authors",
                    &[("author_ID", "ID")],
                    Cardinality::One,
                ))
                .with_element(Element::composition(
                    "pages",
                    "test.Pages",
                    &[("ID", "book_ID")],
                    Cardinality::Many,
                ))
                .with_element(Element::composition(
                    "texts",
                    "test.Books.texts",
                    &[("ID", "ID")],
                    Cardinality::Many,
                )),
        )
        .with_definition(
            Definition::entity("test.Books.texts")
                .with_keys(&["ID", "locale"])
                .with_columns(&["title"]),
        )
        .with_definition(
            Definition::entity("test.Pages")
                .with_keys(&["ID"])
                .with_columns(&["number", "content", "book_ID"])
                .with_element(Element::association(
                    "book",
                    "test.Books",
                    &[("book_ID", "ID")],
                    Cardinality::One,
                )),
        )
        .with_definition(
            Definition::entity("test.Quotes")
                .with_keys(&["ID"])
                .with_columns(&["text", "book_ID"]),
        )
        .with_definition(
            Definition::view(
                "TestService.Books",
                Select::from_entity("test.Books").columns(vec![
                    Column::path("ID"),
                    Column::path("title"),
                    Column::path("author_ID"),
                    Column::aliased(Expr::col("author.name"), "authorName"),
                ]),
            )
            .with_keys(&["ID"])
            .with_columns(&["title", "author_ID", "authorName"])
            .with_element(Element::association(
                "author",
                "test.Authors",
                &[("author_ID", "ID")],
                Cardinality::One,
            )),
        )
        .with_definition(Definition::view("test.CycleA", Select::from_entity("test.CycleB")))
        .with_definition(Definition::view("test.CycleB", Select::from_entity("test.CycleA")))
}

fn row(value: serde_json::Value) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

pub fn dataset() -> Dataset {
    let authors = (1..=3)
        .map(|i| row(json!({"ID": i, "name": format!("Author {i}")})))
        .collect();
    let books = (1..=4)
        .map(|i| {
            row(json!({
                "ID": i,
                "title": format!("Book {i}"),
                "stock": i * 10,
                "author_ID": (i - 1) % 3 + 1,
            }))
        })
        .collect();
    let mut pages = Vec::new();
    let mut page_id = 0;
    for book in 1..=4 {
        for number in 1..=book {
            page_id += 1;
            pages.push(row(json!({
                "ID": page_id,
                "number": number,
                "content": format!("Page {number} of book {book}"),
                "book_ID": book,
            })));
        }
    }
    let texts = (1..=2)
        .map(|i| row(json!({"ID": i, "locale": "de", "title": format!("Buch {i}")})))
        .collect();
    let quotes = vec![
        row(json!({"ID": 1, "text": "first", "book_ID": 1})),
        row(json!({"ID": 2, "text": "second", "book_ID": 1})),
    ];

    Dataset::new()
        .with_relation("test.Authors", authors)
        .with_relation("test.Books", books)
        .with_relation("test.Pages", pages)
        .with_relation("test.Books.texts", texts)
        .with_relation("test.Quotes", quotes)
}
