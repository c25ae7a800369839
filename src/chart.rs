//! Bar charts built from metric tables.

use serde::{Deserialize, Serialize};

use crate::{ChartStyle, MetricTable};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarTrace {
    pub x: Vec<String>,
    pub y: Vec<f64>,
    pub marker_color: String,
    pub marker_line_color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub title: String,
    pub showline: bool,
    pub linewidth: u32,
    pub showgrid: bool,
    pub title_font_family: String,
    pub tickfont_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorderShape {
    pub kind: String,
    pub xref: String,
    pub yref: String,
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    pub line_width: u32,
    pub line_color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub width: u32,
    pub height: u32,
    pub font_family: String,
    pub font_size: u32,
    pub title_font_family: String,
    pub margin_right: u32,
    pub plot_bgcolor: String,
    pub paper_bgcolor: String,
    pub xaxis: Axis,
    pub yaxis: Axis,
    pub shapes: Vec<BorderShape>,
}

/// One dropdown entry: the data and y-axis title shown once it is picked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropdownButton {
    pub label: String,
    pub x: Vec<String>,
    pub y: Vec<f64>,
    pub yaxis: Axis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dropdown {
    pub buttons: Vec<DropdownButton>,
    pub direction: String,
    pub showactive: bool,
    pub x: f64,
    pub xanchor: String,
    pub y: f64,
    pub yanchor: String,
    pub bgcolor: String,
    pub bordercolor: String,
    pub borderwidth: u32,
    pub font_color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    pub name: String,
    pub trace: BarTrace,
    pub layout: Layout,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropdown: Option<Dropdown>,
}

impl Figure {
    pub fn row_count(&self) -> usize {
        self.trace.x.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChartBuilder {
    style: ChartStyle,
}

impl ChartBuilder {
    pub fn new(style: ChartStyle) -> Self {
        Self { style }
    }

    pub fn build(&self, name: &str, table: &MetricTable) -> Figure {
        let (x, y) = sorted_column(table, 0);
        let fg = &self.style.foreground;
        let bg = &self.style.background;

        let layout = Layout {
            width: self.style.width,
            height: self.style.height,
            font_family: self.style.font_family.clone(),
            font_size: self.style.font_size,
            title_font_family: self.style.title_font_family.clone(),
            margin_right: 5,
            plot_bgcolor: bg.clone(),
            paper_bgcolor: bg.clone(),
            xaxis: self.axis(format!("Tested function ({})", table.axis_header())),
            yaxis: self.axis(capitalize(&table.headers()[0])),
            shapes: vec![BorderShape {
                kind: "rect".to_string(),
                xref: "paper".to_string(),
                yref: "paper".to_string(),
                x0: 0.0,
                y0: 0.0,
                x1: 1.0,
                y1: 1.0,
                line_width: 2,
                line_color: fg.clone(),
            }],
        };

        let dropdown = (table.column_count() > 1).then(|| self.dropdown(table));

        Figure {
            name: name.to_string(),
            trace: BarTrace {
                x,
                y,
                marker_color: fg.clone(),
                marker_line_color: fg.clone(),
            },
            layout,
            dropdown,
        }
    }

    fn axis(&self, title: String) -> Axis {
        Axis {
            title,
            showline: true,
            linewidth: 1,
            showgrid: false,
            title_font_family: self.style.title_font_family.clone(),
            tickfont_size: self.style.tick_font_size,
        }
    }

    fn dropdown(&self, table: &MetricTable) -> Dropdown {
        let buttons = table
            .metric_headers()
            .iter()
            .enumerate()
            .map(|(i, header)| {
                let (x, y) = sorted_column(table, i);
                DropdownButton {
                    label: header.clone(),
                    x,
                    y,
                    yaxis: self.axis(capitalize(header)),
                }
            })
            .collect();

        Dropdown {
            buttons,
            direction: "down".to_string(),
            showactive: true,
            x: 1.0,
            xanchor: "right".to_string(),
            y: 1.01,
            yanchor: "bottom".to_string(),
            bgcolor: "#FFF".to_string(),
            bordercolor: self.style.foreground.clone(),
            borderwidth: 2,
            font_color: self.style.foreground.clone(),
        }
    }
}

/// Labels and values of one column, largest value first. Equal values keep
/// their table order.
pub fn sorted_column(table: &MetricTable, column: usize) -> (Vec<String>, Vec<f64>) {
    let values = table.column(column);
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    let labels = order.iter().map(|&i| table.labels()[i].clone()).collect();
    let sorted = order.iter().map(|&i| values[i]).collect();
    (labels, sorted)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
