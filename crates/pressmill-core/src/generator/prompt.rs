use crate::config::{Product, SiteConfig};

const OUTPUT_EXAMPLE: &str = "\
<h2>This is a Perfect Title</h2>
<h3>This is a Subheading</h3>
<p>This is a paragraph about the product, explaining its benefits.</p>
<p>This is another paragraph, continuing the narrative.</p>";

pub fn draft_prompt(product: &Product, site: &SiteConfig) -> String {
    let voice = match &site.tagline {
        Some(tagline) => format!("{} ({tagline})", site.name),
        None => site.name.clone(),
    };
    let description = if product.description.trim().is_empty() {
        "(no description provided)"
    } else {
        product.description.trim()
    };
    format!(
        "You are an expert SEO writer for the website {voice}. \
Write a blog post based on the product below.

**Product Name:** {name}
**Product Description:** {description}

---INSTRUCTIONS---
1. Write an engaging, SEO-optimized blog post about the product.
2. Structure: one main title (<h2>), subheadings (<h3>), and paragraphs (<p>).
3. Output ONLY the raw HTML content. Do NOT include a call to action link, \
<html>, <body>, markdown fences, or any commentary.

---PERFECT OUTPUT EXAMPLE---
{OUTPUT_EXAMPLE}
---END OF EXAMPLE---

Now, generate the HTML for the product: {name}.
",
        name = product.name,
    )
}

pub fn review_prompt(draft_html: &str) -> String {
    format!(
        "You are a meticulous editor. Correct the following HTML blog post draft.

---DRAFT HTML---
{draft_html}
---END OF DRAFT---

---INSTRUCTIONS---
1. Fix grammar, spelling, and flow. Make the content more persuasive and engaging.
2. Keep the structure: one <h2> title, <h3> subheadings, <p> paragraphs.
3. Output ONLY the corrected raw HTML. Do NOT add a call-to-action link, \
<html>, <body>, markdown fences, or commentary.

---PERFECT OUTPUT EXAMPLE---
{OUTPUT_EXAMPLE}
---END OF EXAMPLE---

Now, provide ONLY the corrected HTML.
"
    )
}
