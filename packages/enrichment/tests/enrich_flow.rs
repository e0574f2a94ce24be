//! End-to-end: crawl a mocked site, extract facts, unify into an update.

use std::sync::Arc;

use enrichment::extract::hours::Day;
use enrichment::testing::MockFetcher;
use enrichment::{
    extract_facts, unify, CrawlPipeline, PageReason, PipelineConfig, RateGate, RateGateConfig,
};

fn pipeline(fetcher: MockFetcher) -> CrawlPipeline {
    CrawlPipeline::new(
        Arc::new(fetcher),
        Arc::new(RateGate::new(RateGateConfig::default())),
        PipelineConfig::default(),
    )
}

fn filler(seed: &str) -> String {
    format!("{seed} ").repeat(40)
}

const HOMEPAGE: &str = r#"<html>
<head>
<script type="application/ld+json">
{
  "@type": "Restaurant",
  "telephone": "+44 20 1234 5678",
  "url": "https://v.example",
  "priceRange": "$$",
  "openingHoursSpecification": [{
    "dayOfWeek": ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"],
    "opens": "09:00",
    "closes": "17:00"
  }]
}
</script>
</head>
<body>
<nav>
  <a href="/opening-times">Opening hours</a>
  <a href="/menu">Menu</a>
  <a href="/contact">Contact</a>
</nav>
<p>PLACEHOLDER</p>
</body></html>"#;

#[tokio::test]
async fn crawl_extract_unify_happy_path() {
    let homepage = HOMEPAGE.replace("PLACEHOLDER", &filler("Seasonal cooking on the quay."));
    let hours_page = format!(
        "<html><body><h1>Opening hours</h1><p>Mon-Fri 10:00-16:00</p><p>{}</p></body></html>",
        filler("We close on bank holidays.")
    );
    let menu_page = format!(
        "<html><body><p>Garlic bread £4.50</p><p>Sea bass £18.00</p><p>{}</p></body></html>",
        filler("Sample menu, changes daily.")
    );
    let contact_page = format!(
        "<html><body><p>Call +44 20 1234 5678 or email hello@v.example</p><p>{}</p></body></html>",
        filler("Find us on the quay.")
    );

    let fetcher = MockFetcher::new()
        .with_html("https://v.example/", &homepage)
        .with_html("https://v.example/opening-times", &hours_page)
        .with_html("https://v.example/menu", &menu_page)
        .with_html("https://v.example/contact", &contact_page);

    let outcome = pipeline(fetcher).crawl_site("https://v.example/").await;
    assert!(outcome.homepage_ok());
    assert_eq!(outcome.fetched_count, 4);

    let update = unify(&extract_facts(&outcome.pages));

    // Dedicated hours page outranks the JSON-LD block on the homepage.
    let hours = update.hours.as_ref().expect("hours extracted");
    assert_eq!(
        hours.0[&Day::Mon],
        vec![("10:00".to_string(), "16:00".to_string())]
    );
    assert_eq!(
        update.sources["hours"][0],
        "https://v.example/opening-times"
    );

    let contact = update.contact.as_ref().expect("contact extracted");
    assert_eq!(contact.phone.as_deref(), Some("+44 20 1234 5678"));
    assert_eq!(contact.email.as_deref(), Some("hello@v.example"));

    assert_eq!(update.menu_url.as_deref(), Some("https://v.example/menu"));
    assert!(update.menu_items.is_some());
    assert!(update.price_range.is_some());

    // Every populated field cites at least one crawled page.
    let crawled: Vec<&str> = outcome
        .pages
        .iter()
        .map(|p| p.record.url.as_str())
        .collect();
    for (field, urls) in &update.sources {
        assert!(!urls.is_empty(), "{field} has no sources");
        for url in urls {
            assert!(crawled.contains(&url.as_str()), "{field} cites uncrawled {url}");
        }
    }
}

#[tokio::test]
async fn robots_disallowed_site_yields_no_update() {
    let fetcher =
        MockFetcher::new().with_failure("https://v.example/", PageReason::RobotsDisallowed);
    let outcome = pipeline(fetcher).crawl_site("https://v.example/").await;

    assert!(!outcome.homepage_ok());
    assert_eq!(outcome.failure_reason(), Some(PageReason::RobotsDisallowed));

    let update = unify(&extract_facts(&outcome.pages));
    assert!(update.is_empty());
}
