//! Self-contained HTML export for figures.
//!
//! The initial view is rendered as inline SVG. The figure itself is embedded as
//! JSON and a small inline script redraws the SVG when another metric is picked
//! in the dropdown, so the file needs nothing beyond a browser.

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use std::fmt::Write as _;

use crate::{Axis, Figure, Layout, PerfResult};

const PLOT_LEFT: f64 = 160.0;
const PLOT_TOP: f64 = 90.0;
const PLOT_BOTTOM: f64 = 280.0;
const Y_TICKS: usize = 5;

pub fn render_html(figure: &Figure) -> PerfResult<String> {
    let data = serde_json::to_string(figure)?.replace("</", "<\\/");
    let generated = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    let svg = render_svg(
        &figure.layout,
        &figure.trace.x,
        &figure.trace.y,
        &figure.layout.yaxis,
        &figure.trace.marker_color,
    );

    let mut out = String::new();
    out.push_str("<!doctype html><html><head><meta charset=\"utf-8\">");
    let _ = write!(
        out,
        "<meta name=\"generator\" content=\"perfassess {}\"><meta name=\"generated\" content=\"{}\"><title>{}</title>",
        env!("CARGO_PKG_VERSION"),
        escape_xml(&generated),
        escape_xml(&figure.name),
    );
    let _ = write!(
        out,
        "<style>body{{margin:0;padding:16px;background:{bg};color:{fg};font-family:'{font}',sans-serif}}#menu{{text-align:right;width:{w}px}}#metric{{background:#FFF;color:{fg};border:2px solid {fg};font-size:16px;padding:4px}}</style>",
        bg = escape_xml(&figure.layout.paper_bgcolor),
        fg = escape_xml(&figure.trace.marker_color),
        font = escape_xml(&figure.layout.font_family),
        w = figure.layout.width,
    );
    out.push_str("</head><body>");

    if let Some(dropdown) = &figure.dropdown {
        out.push_str("<div id=\"menu\"><select id=\"metric\">");
        for (i, button) in dropdown.buttons.iter().enumerate() {
            let _ = write!(
                out,
                "<option value=\"{i}\"{}>{}</option>",
                if i == 0 { " selected" } else { "" },
                escape_xml(&button.label)
            );
        }
        out.push_str("</select></div>");
    }

    let _ = write!(out, "<div id=\"chart\">{svg}</div>");
    let _ = write!(
        out,
        "<script type=\"application/json\" id=\"figure-data\">{data}</script>"
    );
    out.push_str("<script>");
    out.push_str(REDRAW_SCRIPT);
    out.push_str("</script></body></html>");
    Ok(out)
}

/// Draws one bar series. Mirrors `drawSvg` in [`REDRAW_SCRIPT`].
pub fn render_svg(layout: &Layout, x: &[String], y: &[f64], yaxis: &Axis, color: &str) -> String {
    let width = f64::from(layout.width);
    let height = f64::from(layout.height);
    let plot_w = (width - PLOT_LEFT - f64::from(layout.margin_right) - 20.0).max(1.0);
    let plot_h = (height - PLOT_TOP - PLOT_BOTTOM).max(1.0);
    let ymax = y.iter().copied().fold(0.0_f64, f64::max);
    let ymax = if ymax > 0.0 { ymax } else { 1.0 };
    let tick = yaxis.tickfont_size;

    let mut out = String::new();
    let _ = write!(
        out,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\" font-family=\"{font}\">",
        font = escape_xml(&layout.font_family),
    );
    let _ = write!(
        out,
        "<rect width=\"100%\" height=\"100%\" fill=\"{}\"/>",
        escape_xml(&layout.plot_bgcolor)
    );

    for k in 0..=Y_TICKS {
        let value = ymax * k as f64 / Y_TICKS as f64;
        let ty = PLOT_TOP + plot_h - plot_h * k as f64 / Y_TICKS as f64;
        let _ = write!(
            out,
            "<text x=\"{:.1}\" y=\"{:.1}\" font-size=\"{tick}\" text-anchor=\"end\" fill=\"{c}\">{}</text>",
            PLOT_LEFT - 10.0,
            ty + f64::from(tick) / 3.0,
            format_tick(value),
            c = escape_xml(color),
        );
    }

    if x.is_empty() {
        let _ = write!(
            out,
            "<text x=\"{:.1}\" y=\"{:.1}\" font-size=\"{tick}\" text-anchor=\"middle\" fill=\"{}\">no data</text>",
            PLOT_LEFT + plot_w / 2.0,
            PLOT_TOP + plot_h / 2.0,
            escape_xml(color),
        );
    }

    let slot = plot_w / x.len().max(1) as f64;
    for (i, (label, value)) in x.iter().zip(y).enumerate() {
        let bar_h = (value.max(0.0) / ymax) * plot_h;
        let bx = PLOT_LEFT + slot * i as f64 + slot * 0.1;
        let cx = PLOT_LEFT + slot * i as f64 + slot / 2.0;
        let _ = write!(
            out,
            "<rect class=\"bar\" x=\"{bx:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{bar_h:.1}\" fill=\"{c}\" stroke=\"{c}\"><title>{}: {}</title></rect>",
            PLOT_TOP + plot_h - bar_h,
            slot * 0.8,
            escape_xml(label),
            value,
            c = escape_xml(color),
        );
        let ly = PLOT_TOP + plot_h + 14.0;
        let _ = write!(
            out,
            "<text x=\"{cx:.1}\" y=\"{ly:.1}\" font-size=\"{tick}\" text-anchor=\"end\" transform=\"rotate(-45 {cx:.1} {ly:.1})\" fill=\"{}\">{}</text>",
            escape_xml(color),
            escape_xml(label),
        );
    }

    let _ = write!(
        out,
        "<rect x=\"{PLOT_LEFT}\" y=\"{PLOT_TOP}\" width=\"{plot_w:.1}\" height=\"{plot_h:.1}\" fill=\"none\" stroke=\"{}\" stroke-width=\"{}\"/>",
        escape_xml(layout.shapes.first().map_or(color, |s| s.line_color.as_str())),
        layout.shapes.first().map_or(1, |s| s.line_width),
    );
    let _ = write!(
        out,
        "<text x=\"{:.1}\" y=\"{:.1}\" font-size=\"{}\" font-weight=\"bold\" font-family=\"{}\" text-anchor=\"middle\" fill=\"{}\">{}</text>",
        PLOT_LEFT + plot_w / 2.0,
        height - 16.0,
        layout.font_size,
        escape_xml(&layout.xaxis.title_font_family),
        escape_xml(color),
        escape_xml(&layout.xaxis.title),
    );
    let yx = 40.0;
    let yy = PLOT_TOP + plot_h / 2.0;
    let _ = write!(
        out,
        "<text id=\"ytitle\" x=\"{yx}\" y=\"{yy:.1}\" font-size=\"{}\" font-weight=\"bold\" font-family=\"{}\" text-anchor=\"middle\" transform=\"rotate(-90 {yx} {yy:.1})\" fill=\"{}\">{}</text>",
        layout.font_size,
        escape_xml(&yaxis.title_font_family),
        escape_xml(color),
        escape_xml(&yaxis.title),
    );
    out.push_str("</svg>");
    out
}

fn format_tick(value: f64) -> String {
    let s = format!("{value:.4}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

const REDRAW_SCRIPT: &str = r#"(function () {
  var figure = JSON.parse(document.getElementById("figure-data").textContent);
  var select = document.getElementById("metric");
  if (!select || !figure.dropdown) { return; }
  var LEFT = 160, TOP = 90, BOTTOM = 280, TICKS = 5;
  function esc(s) {
    return String(s).replace(/&/g, "&amp;").replace(/</g, "&lt;").replace(/>/g, "&gt;")
      .replace(/"/g, "&quot;").replace(/'/g, "&apos;");
  }
  function tick(v) { return String(Number(v.toFixed(4))); }
  function drawSvg(layout, x, y, yaxis, color) {
    var w = layout.width, h = layout.height;
    var pw = Math.max(w - LEFT - layout.margin_right - 20, 1);
    var ph = Math.max(h - TOP - BOTTOM, 1);
    var ymax = Math.max.apply(null, [0].concat(y));
    if (!(ymax > 0)) { ymax = 1; }
    var ts = yaxis.tickfont_size, c = esc(color);
    var out = '<svg xmlns="http://www.w3.org/2000/svg" width="' + w + '" height="' + h +
      '" font-family="' + esc(layout.font_family) + '">';
    out += '<rect width="100%" height="100%" fill="' + esc(layout.plot_bgcolor) + '"/>';
    for (var k = 0; k <= TICKS; k++) {
      var ty = TOP + ph - ph * k / TICKS;
      out += '<text x="' + (LEFT - 10) + '" y="' + (ty + ts / 3) + '" font-size="' + ts +
        '" text-anchor="end" fill="' + c + '">' + tick(ymax * k / TICKS) + '</text>';
    }
    var slot = pw / Math.max(x.length, 1);
    for (var i = 0; i < x.length; i++) {
      var bh = Math.max(y[i], 0) / ymax * ph;
      var cx = LEFT + slot * i + slot / 2, ly = TOP + ph + 14;
      out += '<rect class="bar" x="' + (LEFT + slot * i + slot * 0.1) + '" y="' + (TOP + ph - bh) +
        '" width="' + (slot * 0.8) + '" height="' + bh + '" fill="' + c + '" stroke="' + c +
        '"><title>' + esc(x[i]) + ': ' + y[i] + '</title></rect>';
      out += '<text x="' + cx + '" y="' + ly + '" font-size="' + ts +
        '" text-anchor="end" transform="rotate(-45 ' + cx + ' ' + ly + ')" fill="' + c + '">' +
        esc(x[i]) + '</text>';
    }
    var border = layout.shapes[0];
    out += '<rect x="' + LEFT + '" y="' + TOP + '" width="' + pw + '" height="' + ph +
      '" fill="none" stroke="' + esc(border ? border.line_color : color) + '" stroke-width="' +
      (border ? border.line_width : 1) + '"/>';
    out += '<text x="' + (LEFT + pw / 2) + '" y="' + (h - 16) + '" font-size="' + layout.font_size +
      '" font-weight="bold" font-family="' + esc(layout.xaxis.title_font_family) +
      '" text-anchor="middle" fill="' + c + '">' + esc(layout.xaxis.title) + '</text>';
    var yy = TOP + ph / 2;
    out += '<text id="ytitle" x="40" y="' + yy + '" font-size="' + layout.font_size +
      '" font-weight="bold" font-family="' + esc(yaxis.title_font_family) +
      '" text-anchor="middle" transform="rotate(-90 40 ' + yy + ')" fill="' + c + '">' +
      esc(yaxis.title) + '</text>';
    return out + '</svg>';
  }
  select.addEventListener("change", function () {
    var button = figure.dropdown.buttons[Number(select.value)];
    document.getElementById("chart").innerHTML =
      drawSvg(figure.layout, button.x, button.y, button.yaxis, figure.trace.marker_color);
  });
})();
"#;
