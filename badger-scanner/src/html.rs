use badger_core::SiteMetadata;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").expect("static selector"));
static IMG: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").expect("static selector"));
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("static selector"));
static META: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("meta[name]").expect("static selector"));

/// An `<img>` as written in the page; `src` is not resolved yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageRef {
    pub src: Option<String>,
    pub alt: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Anchor {
    pub href: Option<String>,
    pub images: Vec<ImageRef>,
}

/// What the crawler needs from a page, in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageDocument {
    pub metadata: SiteMetadata,
    pub anchors: Vec<Anchor>,
    /// Images with no enclosing `<a>`.
    pub loose_images: Vec<ImageRef>,
}

pub fn parse_page(html: &str) -> PageDocument {
    let document = Html::parse_document(html);

    let anchors = document
        .select(&ANCHOR)
        .map(|a| Anchor {
            href: attr(&a, "href"),
            images: a.select(&IMG).map(|img| image_ref(&img)).collect(),
        })
        .collect();

    let loose_images = document
        .select(&IMG)
        .filter(|img| !inside_anchor(img))
        .map(|img| image_ref(&img))
        .collect();

    PageDocument {
        metadata: extract_metadata(&document),
        anchors,
        loose_images,
    }
}

pub fn extract_metadata(document: &Html) -> SiteMetadata {
    let title = document
        .select(&TITLE)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let meta_content = |name: &str| {
        document
            .select(&META)
            .find(|m| {
                m.value()
                    .attr("name")
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
            })
            .and_then(|m| m.value().attr("content"))
            .map(|c| c.trim().to_string())
    };

    let keywords = meta_content("keywords").map(|k| {
        k.split(',')
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .collect()
    });

    SiteMetadata {
        title,
        keywords,
        description: meta_content("description"),
    }
}

fn attr(element: &ElementRef, name: &str) -> Option<String> {
    element.value().attr(name).map(|v| v.to_string())
}

fn image_ref(img: &ElementRef) -> ImageRef {
    ImageRef {
        src: attr(img, "src"),
        alt: attr(img, "alt"),
        title: attr(img, "title"),
    }
}

fn inside_anchor(element: &ElementRef) -> bool {
    element.ancestors().any(|node| {
        node.value()
            .as_element()
            .is_some_and(|e| e.name().eq_ignore_ascii_case("a"))
    })
}
