//! SVG template binder: reads the private settings block, rescales the
//! template to the recorded geometry, and grafts the composed animation
//! into the `screen` element.

use std::fmt::Write as _;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event as XmlEvent};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};

use super::compositor::{ComposedAnimation, ComposedScroll, Definitions};
use crate::asciicast::Theme;
use crate::config::RenderConfig;
use crate::error::{Error, Result};
use crate::replay::Geometry;

/// Namespace URI of the template settings block.
pub const SETTINGS_NAMESPACE: &str = "https://inkcast.dev/svg";

/// How the bound SVG drives its animation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationType {
    /// SMIL `display` animations chained to the loop sentinel.
    Css,
    /// Vertically stacked views scrolled by a Web Animations API script.
    Waapi,
}

/// Settings declared by a template: the screen geometry it was drawn for
/// and the animation flavor it expects.
#[derive(Debug, Clone, Copy)]
pub struct TemplateSettings {
    pub columns: u16,
    pub rows: u16,
    pub animation: AnimationType,
}

/// Composed screen content ready to be grafted into a template.
pub enum Rendered<'a> {
    Animation(&'a ComposedAnimation),
    Scroll(&'a ComposedScroll),
    Still {
        definitions: &'a Definitions,
        body: &'a str,
    },
}

fn xml_err(e: impl std::fmt::Display) -> Error {
    Error::template(format!("invalid template XML: {e}"))
}

fn attr_value(e: &BytesStart, key: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(xml_err)?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value().map_err(xml_err)?.into_owned()));
        }
    }
    Ok(None)
}

fn has_id(e: &BytesStart, id: &str) -> Result<bool> {
    Ok(attr_value(e, b"id")?.as_deref() == Some(id))
}

/// Scan a template for its settings block and required anchor elements.
pub fn read_settings(template: &[u8]) -> Result<TemplateSettings> {
    let mut reader = Reader::from_reader(template);

    let mut root_seen = false;
    let mut screen_seen = false;
    let mut style_seen = false;
    let mut script_seen = false;
    let mut geometry: Option<(u16, u16)> = None;
    let mut animation: Option<AnimationType> = None;

    loop {
        let event = reader.read_event().map_err(xml_err)?;
        let start = match &event {
            XmlEvent::Start(e) | XmlEvent::Empty(e) => e,
            XmlEvent::Eof => break,
            _ => continue,
        };

        match start.local_name().as_ref() {
            b"svg" if !root_seen => {
                root_seen = true;
                if attr_value(start, b"viewBox")?.is_none() {
                    return Err(Error::template("root svg element has no viewBox"));
                }
            }
            b"svg" if has_id(start, "screen")? => {
                screen_seen = true;
                if attr_value(start, b"viewBox")?.is_none() {
                    return Err(Error::template("screen element has no viewBox"));
                }
            }
            b"screen_geometry" => {
                let columns = attr_value(start, b"columns")?
                    .and_then(|v| v.parse::<i64>().ok())
                    .ok_or_else(|| Error::template("screen_geometry has no integer columns"))?;
                let rows = attr_value(start, b"rows")?
                    .and_then(|v| v.parse::<i64>().ok())
                    .ok_or_else(|| Error::template("screen_geometry has no integer rows"))?;
                if columns <= 0 || rows <= 0 || columns > i64::from(u16::MAX) || rows > i64::from(u16::MAX) {
                    return Err(Error::template(format!(
                        "non-positive template geometry: {columns}x{rows}"
                    )));
                }
                geometry = Some((columns as u16, rows as u16));
            }
            b"animation" => {
                animation = Some(match attr_value(start, b"type")?.as_deref() {
                    Some("css") => AnimationType::Css,
                    Some("waapi") => AnimationType::Waapi,
                    Some(other) => {
                        return Err(Error::template(format!("unknown animation type: {other}")))
                    }
                    None => return Err(Error::template("animation element has no type")),
                });
            }
            b"style" if has_id(start, "generated-style")? => style_seen = true,
            b"script" if has_id(start, "generated-js")? => script_seen = true,
            _ => {}
        }
    }

    if !root_seen {
        return Err(Error::template("no svg root element"));
    }
    if !screen_seen {
        return Err(Error::template("no svg element with id \"screen\""));
    }
    if !style_seen {
        return Err(Error::template("no style element with id \"generated-style\""));
    }
    let (columns, rows) =
        geometry.ok_or_else(|| Error::template("no template_settings screen_geometry block"))?;
    // Templates that predate the animation setting drive SMIL animations.
    let animation = animation.unwrap_or(AnimationType::Css);
    if animation == AnimationType::Waapi && !script_seen {
        return Err(Error::template(
            "waapi animation requested but no script element with id \"generated-js\"",
        ));
    }

    Ok(TemplateSettings {
        columns,
        rows,
        animation,
    })
}

fn scale_viewbox(value: &str, dw: i64, dh: i64) -> Result<String> {
    let parts: Vec<i64> = value
        .split_whitespace()
        .map(|p| p.parse::<i64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| Error::template(format!("non-integer viewBox: {value}")))?;
    if parts.len() != 4 {
        return Err(Error::template(format!("invalid viewBox: {value}")));
    }
    Ok(format!(
        "{} {} {} {}",
        parts[0],
        parts[1],
        parts[2] + dw,
        parts[3] + dh
    ))
}

/// Apply a user-unit delta to a width/height attribute. Non-numeric values
/// (percentages, unit-suffixed lengths) pass through unchanged.
fn scale_length(value: &str, delta: i64) -> String {
    if let Ok(v) = value.parse::<i64>() {
        (v + delta).to_string()
    } else if let Ok(v) = value.parse::<f64>() {
        format!("{}", v + delta as f64)
    } else {
        value.to_string()
    }
}

fn scale_element(e: &BytesStart, dw: i64, dh: i64) -> Result<BytesStart<'static>> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr.map_err(xml_err)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(xml_err)?;
        match key.as_str() {
            "viewBox" => out.push_attribute(("viewBox", scale_viewbox(&value, dw, dh)?.as_str())),
            "width" => out.push_attribute(("width", scale_length(&value, dw).as_str())),
            "height" => out.push_attribute(("height", scale_length(&value, dh).as_str())),
            _ => out.push_attribute((key.as_str(), value.as_ref())),
        }
    }
    Ok(out)
}

fn rewrite_geometry(e: &BytesStart, geometry: Geometry) -> Result<BytesStart<'static>> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr.map_err(xml_err)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        match key.as_str() {
            "columns" => out.push_attribute(("columns", geometry.columns.to_string().as_str())),
            "rows" => out.push_attribute(("rows", geometry.rows.to_string().as_str())),
            _ => {
                let value = attr.unescape_value().map_err(xml_err)?;
                out.push_attribute((key.as_str(), value.as_ref()));
            }
        }
    }
    Ok(out)
}

fn generated_css(theme: &Theme, animation_duration: Option<u64>) -> String {
    let mut css = String::new();
    css.push_str(concat!(
        "#screen {\n",
        "  font-family: \"DejaVu Sans Mono\", monospace;\n",
        "  font-style: normal;\n",
        "  font-size: 14px;\n",
        "}\n",
        "text {\n",
        "  dominant-baseline: text-before-edge;\n",
        "  white-space: pre;\n",
        "}\n",
    ));
    let _ = write!(
        css,
        ".foreground {{fill: {}}}\n.background {{fill: {}}}\n",
        theme.foreground(),
        theme.background()
    );
    // Only the first 16 slots are addressable as cell colors
    for (i, color) in theme.palette().iter().take(16).enumerate() {
        let _ = write!(css, ".color{i} {{fill: {color}}}\n");
    }
    if let Some(duration) = animation_duration {
        let _ = write!(css, ":root {{--animation-duration: {duration}ms}}\n");
    }
    css
}

fn generated_js(keyframes: &str, duration_ms: u64) -> String {
    // No '<' or '&' may appear here: the script body is written as raw XML
    // text content.
    format!(
        concat!(
            "var inkcast = {{\n",
            "  keyframes: {keyframes},\n",
            "  duration: {duration}\n",
            "}};\n",
            "(function () {{\n",
            "  var view = document.getElementById(\"screen_view\");\n",
            "  if (view === null) {{ return; }}\n",
            "  view.animate(inkcast.keyframes, {{\n",
            "    duration: inkcast.duration,\n",
            "    iterations: Infinity\n",
            "  }});\n",
            "}})();\n",
        ),
        keyframes = keyframes,
        duration = duration_ms,
    )
}

fn screen_markup(rendered: &Rendered) -> String {
    let mut out = String::new();
    out.push_str("<rect class=\"background\" height=\"100%\" width=\"100%\" x=\"0\" y=\"0\"/>");
    let definitions = match rendered {
        Rendered::Animation(a) => &a.definitions,
        Rendered::Scroll(s) => &s.definitions,
        Rendered::Still { definitions, .. } => definitions,
    };
    out.push_str("<defs>");
    for entry in definitions.entries() {
        out.push_str(entry);
    }
    out.push_str("</defs>");
    out.push_str("<g id=\"screen_view\">");
    match rendered {
        Rendered::Animation(a) => {
            for group in &a.groups {
                out.push_str(group);
            }
        }
        Rendered::Scroll(s) => {
            for view in &s.views {
                out.push_str(view);
            }
        }
        Rendered::Still { body, .. } => out.push_str(body),
    }
    out.push_str("</g>");
    out
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: XmlEvent) -> Result<()> {
    writer.write_event(event).map_err(xml_err)
}

fn write_raw(writer: &mut Writer<Vec<u8>>, raw: &str) -> Result<()> {
    write_event(writer, XmlEvent::Text(BytesText::from_escaped(raw)))
}

/// Bind composed screen content into a template: rescale it to the recorded
/// geometry, rewrite the declared settings, replace the screen children, and
/// fill the generated style (and, for WAAPI templates, script) elements.
pub fn bind(
    template: &[u8],
    settings: &TemplateSettings,
    rendered: &Rendered,
    geometry: Geometry,
    theme: &Theme,
    config: &RenderConfig,
) -> Result<Vec<u8>> {
    let dw = i64::from(config.cell_width)
        * (i64::from(geometry.columns) - i64::from(settings.columns));
    let dh =
        i64::from(config.cell_height) * (i64::from(geometry.rows) - i64::from(settings.rows));

    let (css, js) = match rendered {
        Rendered::Animation(a) => (generated_css(theme, Some(a.duration_ms)), None),
        Rendered::Scroll(s) => (
            generated_css(theme, None),
            Some(generated_js(&s.keyframes, s.duration_ms)),
        ),
        Rendered::Still { .. } => (generated_css(theme, None), None),
    };
    let markup = screen_markup(rendered);

    let mut reader = Reader::from_reader(template);
    let mut writer = Writer::new(Vec::new());
    let mut root_seen = false;

    loop {
        let event = reader.read_event().map_err(xml_err)?;
        match event {
            XmlEvent::Eof => break,
            XmlEvent::Start(e) => {
                let local = e.local_name().as_ref().to_vec();
                if local == b"svg" && !root_seen {
                    root_seen = true;
                    write_event(&mut writer, XmlEvent::Start(scale_element(&e, dw, dh)?))?;
                } else if local == b"svg" && has_id(&e, "screen")? {
                    let name = e.name().as_ref().to_vec();
                    write_event(&mut writer, XmlEvent::Start(scale_element(&e, dw, dh)?))?;
                    reader.read_to_end(QName(&name)).map_err(xml_err)?;
                    write_raw(&mut writer, &markup)?;
                    let end = String::from_utf8_lossy(&name).into_owned();
                    write_event(&mut writer, XmlEvent::End(BytesEnd::new(end)))?;
                } else if local == b"screen_geometry" {
                    write_event(&mut writer, XmlEvent::Start(rewrite_geometry(&e, geometry)?))?;
                } else if local == b"style" && has_id(&e, "generated-style")? {
                    let name = e.name().as_ref().to_vec();
                    write_event(&mut writer, XmlEvent::Start(e))?;
                    reader.read_to_end(QName(&name)).map_err(xml_err)?;
                    write_raw(&mut writer, &css)?;
                    let end = String::from_utf8_lossy(&name).into_owned();
                    write_event(&mut writer, XmlEvent::End(BytesEnd::new(end)))?;
                } else if local == b"script" && has_id(&e, "generated-js")? {
                    let name = e.name().as_ref().to_vec();
                    write_event(&mut writer, XmlEvent::Start(e))?;
                    reader.read_to_end(QName(&name)).map_err(xml_err)?;
                    if let Some(js) = &js {
                        write_raw(&mut writer, js)?;
                    }
                    let end = String::from_utf8_lossy(&name).into_owned();
                    write_event(&mut writer, XmlEvent::End(BytesEnd::new(end)))?;
                } else {
                    write_event(&mut writer, XmlEvent::Start(e))?;
                }
            }
            XmlEvent::Empty(e) => {
                let local = e.local_name().as_ref().to_vec();
                if local == b"svg" && !root_seen {
                    root_seen = true;
                    write_event(&mut writer, XmlEvent::Empty(scale_element(&e, dw, dh)?))?;
                } else if local == b"svg" && has_id(&e, "screen")? {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    write_event(&mut writer, XmlEvent::Start(scale_element(&e, dw, dh)?))?;
                    write_raw(&mut writer, &markup)?;
                    write_event(&mut writer, XmlEvent::End(BytesEnd::new(name)))?;
                } else if local == b"screen_geometry" {
                    write_event(&mut writer, XmlEvent::Empty(rewrite_geometry(&e, geometry)?))?;
                } else if local == b"style" && has_id(&e, "generated-style")? {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    write_event(&mut writer, XmlEvent::Start(e))?;
                    write_raw(&mut writer, &css)?;
                    write_event(&mut writer, XmlEvent::End(BytesEnd::new(name)))?;
                } else if local == b"script" && has_id(&e, "generated-js")? {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    write_event(&mut writer, XmlEvent::Start(e))?;
                    if let Some(js) = &js {
                        write_raw(&mut writer, js)?;
                    }
                    write_event(&mut writer, XmlEvent::End(BytesEnd::new(name)))?;
                } else {
                    write_event(&mut writer, XmlEvent::Empty(e))?;
                }
            }
            other => write_event(&mut writer, other)?,
        }
    }

    if !root_seen {
        return Err(Error::template("no svg root element"));
    }

    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svg::compositor::compose_animation;
    use crate::render::cell::{CellColor, CharacterCell};
    use crate::render::frame::{LineBuffer, LineEvent};

    const TEMPLATE: &str = concat!(
        r#"<?xml version="1.0" encoding="utf-8"?>"#,
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" "#,
        r#"xmlns:ink="https://inkcast.dev/svg" viewBox="0 0 640 408" width="640" height="408">"#,
        r#"<ink:template_settings>"#,
        r#"<ink:screen_geometry columns="80" rows="24"/>"#,
        r#"<ink:animation type="css"/>"#,
        r#"</ink:template_settings>"#,
        r#"<defs><style id="generated-style"></style></defs>"#,
        r#"<svg id="screen" viewBox="0 0 640 408" width="640" height="408">"#,
        r#"<rect x="0" y="0" width="1" height="1"/>"#,
        r#"</svg>"#,
        r#"</svg>"#,
    );

    fn theme() -> Theme {
        Theme::new("#aabbcc", "#001122", &["#123456"; 16].join(":")).unwrap()
    }

    fn settings() -> TemplateSettings {
        read_settings(TEMPLATE.as_bytes()).unwrap()
    }

    fn composed() -> ComposedAnimation {
        let line: LineBuffer = [(
            0u16,
            CharacterCell {
                text: "x".to_string(),
                color: CellColor::Foreground,
                background_color: CellColor::Background,
                bold: false,
                italic: false,
                underline: false,
                strikethrough: false,
            },
        )]
        .into_iter()
        .collect();
        let events = vec![Ok(LineEvent {
            row: 0,
            line,
            time_ms: 0,
            duration_ms: 1000,
        })];
        compose_animation(events.into_iter(), &RenderConfig::default()).unwrap()
    }

    #[test]
    fn settings_are_read() {
        let settings = settings();
        assert_eq!(settings.columns, 80);
        assert_eq!(settings.rows, 24);
        assert_eq!(settings.animation, AnimationType::Css);
    }

    #[test]
    fn missing_anchors_are_template_errors() {
        let no_screen = TEMPLATE.replace(r#"id="screen""#, r#"id="other""#);
        assert!(matches!(
            read_settings(no_screen.as_bytes()),
            Err(Error::TemplateError(_))
        ));

        let no_style = TEMPLATE.replace(r#"id="generated-style""#, r#"id="other""#);
        assert!(matches!(
            read_settings(no_style.as_bytes()),
            Err(Error::TemplateError(_))
        ));

        let no_geometry = TEMPLATE.replace("screen_geometry", "noop");
        assert!(matches!(
            read_settings(no_geometry.as_bytes()),
            Err(Error::TemplateError(_))
        ));

        let bad_type = TEMPLATE.replace(r#"type="css""#, r#"type="gif""#);
        assert!(matches!(
            read_settings(bad_type.as_bytes()),
            Err(Error::TemplateError(_))
        ));
    }

    #[test]
    fn waapi_requires_generated_js() {
        let waapi = TEMPLATE.replace(r#"type="css""#, r#"type="waapi""#);
        assert!(matches!(
            read_settings(waapi.as_bytes()),
            Err(Error::TemplateError(_))
        ));

        let with_js = waapi.replace(
            "<defs>",
            r#"<defs><script id="generated-js"></script>"#,
        );
        let settings = read_settings(with_js.as_bytes()).unwrap();
        assert_eq!(settings.animation, AnimationType::Waapi);
    }

    #[test]
    fn bind_rescales_viewboxes_and_settings() {
        let composed = composed();
        let geometry = Geometry {
            columns: 100,
            rows: 30,
        };
        let bound = bind(
            TEMPLATE.as_bytes(),
            &settings(),
            &Rendered::Animation(&composed),
            geometry,
            &theme(),
            &RenderConfig::default(),
        )
        .unwrap();
        let text = String::from_utf8(bound).unwrap();

        // 80x24 -> 100x30 at 8x17: +160 wide, +102 tall
        assert!(text.contains(r#"viewBox="0 0 800 510""#), "text: {text}");
        assert!(text.contains(r#"width="800""#));
        assert!(text.contains(r#"height="510""#));
        assert!(text.contains(r#"columns="100""#));
        assert!(text.contains(r#"rows="30""#));
    }

    #[test]
    fn bind_replaces_screen_children() {
        let composed = composed();
        let geometry = Geometry {
            columns: 80,
            rows: 24,
        };
        let bound = bind(
            TEMPLATE.as_bytes(),
            &settings(),
            &Rendered::Animation(&composed),
            geometry,
            &theme(),
            &RenderConfig::default(),
        )
        .unwrap();
        let text = String::from_utf8(bound).unwrap();

        // Old screen content is gone, replaced by background + defs + view
        assert!(!text.contains(r#"<rect x="0" y="0" width="1" height="1"/>"#));
        assert!(text.contains(r#"<rect class="background" height="100%" width="100%" x="0" y="0"/>"#));
        assert!(text.contains(r#"<g id="g1">"#));
        assert!(text.contains(r#"<g id="screen_view">"#));
        assert!(text.contains(r#"id="anim_last""#));
    }

    #[test]
    fn bind_fills_generated_style() {
        let composed = composed();
        let geometry = Geometry {
            columns: 80,
            rows: 24,
        };
        let bound = bind(
            TEMPLATE.as_bytes(),
            &settings(),
            &Rendered::Animation(&composed),
            geometry,
            &theme(),
            &RenderConfig::default(),
        )
        .unwrap();
        let text = String::from_utf8(bound).unwrap();

        assert!(text.contains(".foreground {fill: #aabbcc}"));
        assert!(text.contains(".background {fill: #001122}"));
        assert!(text.contains(".color15 {fill: #123456}"));
        assert!(text.contains("--animation-duration: 1000ms"));
        assert!(text.contains("dominant-baseline: text-before-edge"));
    }

    #[test]
    fn percentage_lengths_pass_through() {
        let template = TEMPLATE.replace(r#"width="640" height="408">"#, r#"width="100%" height="408">"#);
        let composed = composed();
        let geometry = Geometry {
            columns: 100,
            rows: 24,
        };
        let bound = bind(
            template.as_bytes(),
            &settings(),
            &Rendered::Animation(&composed),
            geometry,
            &theme(),
            &RenderConfig::default(),
        )
        .unwrap();
        let text = String::from_utf8(bound).unwrap();

        assert!(text.contains(r#"width="100%""#));
    }

    #[test]
    fn non_integer_viewbox_is_rejected() {
        let template = TEMPLATE.replacen(r#"viewBox="0 0 640 408""#, r#"viewBox="0 0 64.5 408""#, 1);
        let composed = composed();
        let result = bind(
            template.as_bytes(),
            &settings(),
            &Rendered::Animation(&composed),
            Geometry {
                columns: 80,
                rows: 24,
            },
            &theme(),
            &RenderConfig::default(),
        );
        assert!(matches!(result, Err(Error::TemplateError(_))));
    }
}
