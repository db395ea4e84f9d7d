// ==========================================
// 铁路区段调度系统 - 运行图 CSV 加载
// ==========================================
// 阶段 0: 文件读取与解析（表头 → 行映射）
// 阶段 1: 字段映射与类型转换（错误携带行号）
// 阶段 2: 按车次分组、按 seq 排序，组装 Train
// ==========================================

use crate::domain::train::{ItineraryLeg, Train};
use crate::domain::types::TrainClass;
use crate::importer::error::{ImportError, ImportResult};
use chrono::NaiveDateTime;
use csv::ReaderBuilder;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const REQUIRED_COLUMNS: [&str; 8] = [
    "train_id",
    "train_name",
    "class",
    "max_speed_kmh",
    "seq",
    "section_id",
    "scheduled_entry",
    "scheduled_exit",
];

/// 单行运行图记录（已完成类型转换）
#[derive(Debug, Clone)]
struct TimetableRow {
    row: usize,
    train_id: String,
    train_name: String,
    class: TrainClass,
    max_speed_kmh: f64,
    seq: u32,
    section_id: String,
    scheduled_entry: NaiveDateTime,
    scheduled_exit: NaiveDateTime,
}

// ==========================================
// TimetableLoader
// ==========================================
pub struct TimetableLoader;

impl TimetableLoader {
    /// 从 CSV 文件加载列车运行图
    pub fn load_path(path: &Path) -> ImportResult<Vec<Train>> {
        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }
        if let Some(ext) = path.extension() {
            if ext != "csv" {
                return Err(ImportError::UnsupportedFormat(
                    ext.to_string_lossy().to_string(),
                ));
            }
        }

        let file = std::fs::File::open(path)?;
        let trains = Self::load_reader(file)?;
        tracing::info!(
            "读取运行图: path={}, trains={}",
            path.display(),
            trains.len()
        );
        Ok(trains)
    }

    /// 从任意 Reader 加载（首行为表头）
    pub fn load_reader<R: Read>(reader: R) -> ImportResult<Vec<Train>> {
        let raw = parse_raw_records(reader)?;
        let rows = raw
            .into_iter()
            .map(|(row, record)| map_row(row, &record))
            .collect::<ImportResult<Vec<_>>>()?;
        assemble_trains(rows)
    }
}

// ===== 阶段 0 =====

fn parse_raw_records<R: Read>(reader: R) -> ImportResult<Vec<(usize, HashMap<String, String>)>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ImportError::CsvParseError {
            row: 1,
            message: e.to_string(),
        })?
        .iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();

    if let Some(missing) = REQUIRED_COLUMNS
        .iter()
        .find(|col| !headers.iter().any(|h| h == *col))
    {
        return Err(ImportError::CsvParseError {
            row: 1,
            message: format!("缺少列 {}", missing),
        });
    }

    let mut records = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        // 表头占第 1 行
        let row = idx + 2;
        let record = result.map_err(|e| ImportError::CsvParseError {
            row,
            message: e.to_string(),
        })?;

        let row_map: HashMap<String, String> = headers
            .iter()
            .cloned()
            .zip(record.iter().map(|v| v.trim().to_string()))
            .collect();

        // 跳过空行
        if row_map.values().all(|v| v.is_empty()) {
            continue;
        }
        records.push((row, row_map));
    }
    Ok(records)
}

// ===== 阶段 1 =====

fn field<'a>(row: usize, record: &'a HashMap<String, String>, name: &str) -> ImportResult<&'a str> {
    match record.get(name).map(String::as_str) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ImportError::TypeConversionError {
            row,
            field: name.to_string(),
            message: "字段为空".to_string(),
        }),
    }
}

fn parse_time(row: usize, record: &HashMap<String, String>, name: &str) -> ImportResult<NaiveDateTime> {
    let value = field(row, record, name)?;
    NaiveDateTime::parse_from_str(value, TIME_FORMAT).map_err(|_| ImportError::DateFormatError {
        row,
        field: name.to_string(),
        value: value.to_string(),
    })
}

fn map_row(row: usize, record: &HashMap<String, String>) -> ImportResult<TimetableRow> {
    let class_raw = field(row, record, "class")?;
    let class = TrainClass::parse(class_raw).ok_or_else(|| ImportError::TypeConversionError {
        row,
        field: "class".to_string(),
        message: format!("未知列车等级 {}", class_raw),
    })?;

    let speed_raw = field(row, record, "max_speed_kmh")?;
    let max_speed_kmh = speed_raw
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or_else(|| ImportError::TypeConversionError {
            row,
            field: "max_speed_kmh".to_string(),
            message: format!("需要正数，实际 {}", speed_raw),
        })?;

    let seq_raw = field(row, record, "seq")?;
    let seq = seq_raw
        .parse::<u32>()
        .map_err(|e| ImportError::TypeConversionError {
            row,
            field: "seq".to_string(),
            message: e.to_string(),
        })?;

    let scheduled_entry = parse_time(row, record, "scheduled_entry")?;
    let scheduled_exit = parse_time(row, record, "scheduled_exit")?;
    if scheduled_exit <= scheduled_entry {
        return Err(ImportError::TypeConversionError {
            row,
            field: "scheduled_exit".to_string(),
            message: "出清时刻必须晚于进入时刻".to_string(),
        });
    }

    Ok(TimetableRow {
        row,
        train_id: field(row, record, "train_id")?.to_string(),
        train_name: record.get("train_name").cloned().unwrap_or_default(),
        class,
        max_speed_kmh,
        seq,
        section_id: field(row, record, "section_id")?.to_string(),
        scheduled_entry,
        scheduled_exit,
    })
}

// ===== 阶段 2 =====

fn assemble_trains(rows: Vec<TimetableRow>) -> ImportResult<Vec<Train>> {
    // 保持车次首次出现的顺序
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, BTreeMap<u32, TimetableRow>> = HashMap::new();

    for row in rows {
        let group = groups.entry(row.train_id.clone()).or_insert_with(|| {
            order.push(row.train_id.clone());
            BTreeMap::new()
        });

        if let Some(first) = group.values().next() {
            if first.class != row.class || first.max_speed_kmh != row.max_speed_kmh {
                return Err(ImportError::InvalidItinerary {
                    train_id: row.train_id.clone(),
                    message: format!("第 {} 行的等级或最高速度与前序行不一致", row.row),
                });
            }
        }
        if group.contains_key(&row.seq) {
            return Err(ImportError::InvalidItinerary {
                train_id: row.train_id.clone(),
                message: format!("第 {} 行 seq={} 重复", row.row, row.seq),
            });
        }
        group.insert(row.seq, row);
    }

    let mut trains = Vec::with_capacity(order.len());
    for train_id in order {
        let Some(group) = groups.remove(&train_id) else {
            continue;
        };
        let legs: Vec<&TimetableRow> = group.values().collect();
        for pair in legs.windows(2) {
            if pair[1].scheduled_entry < pair[0].scheduled_exit {
                return Err(ImportError::InvalidItinerary {
                    train_id: train_id.clone(),
                    message: format!(
                        "第 {} 行进入时刻早于上一段出清时刻",
                        pair[1].row
                    ),
                });
            }
        }

        let Some(first) = legs.first() else {
            continue;
        };
        let name = if first.train_name.is_empty() {
            train_id.clone()
        } else {
            first.train_name.clone()
        };
        let itinerary = legs
            .iter()
            .map(|r| ItineraryLeg::new(r.section_id.clone(), r.scheduled_entry, r.scheduled_exit))
            .collect();
        trains.push(Train::new(
            train_id.clone(),
            name,
            first.class,
            first.max_speed_kmh,
            itinerary,
        ));
    }
    Ok(trains)
}
