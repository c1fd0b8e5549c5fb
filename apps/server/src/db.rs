use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::SqlitePool;

use crate::booking::availability::day_bounds;
use crate::booking::hours::WorkingHours;
use crate::models::*;
use crate::store::{StoreError, StudioStore};

pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    // Enable WAL mode for better concurrent access
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await?;

    let applied: bool =
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM _migrations WHERE name = '001_init'")
            .fetch_one(pool)
            .await?;

    if !applied {
        let migration_sql = include_str!("../migrations/001_init.sql");
        let mut tx = pool.begin().await?;
        for statement in migration_sql.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed).execute(&mut *tx).await?;
            }
        }
        sqlx::query("INSERT INTO _migrations (name) VALUES ('001_init')")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!("Applied migration: 001_init");
    }

    tracing::info!("Database migrations up to date");
    Ok(())
}

/// Fixed-width UTC text, so string order is time order.
pub fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {:?}: {}", raw, e)))
}

const SERVICE_COLUMNS: &str =
    "id, name, description, price, duration_min, category, pain_level, is_active, sort_order";
const JEWELRY_COLUMNS: &str = "id, name, price, category, in_stock, image_url";
const COUPON_COLUMNS: &str =
    "id, code, discount_type, value, min_order_amount, is_active, max_uses, used_count";
const APPOINTMENT_COLUMNS: &str = "id, client_name, client_phone, client_id_number, client_email,
    primary_service, service_label, start_time, end_time, status, notes, signature, coupon_code,
    base_price, discount_amount, final_price, visual_plan, created_at";

#[derive(sqlx::FromRow)]
struct AppointmentRow {
    id: i64,
    client_name: String,
    client_phone: String,
    client_id_number: String,
    client_email: Option<String>,
    primary_service: String,
    service_label: String,
    start_time: String,
    end_time: String,
    status: AppointmentStatus,
    notes: Option<String>,
    signature: String,
    coupon_code: Option<String>,
    base_price: i64,
    discount_amount: i64,
    final_price: i64,
    visual_plan: Option<String>,
    created_at: String,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = StoreError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        Ok(Appointment {
            id: row.id,
            client_name: row.client_name,
            client_phone: row.client_phone,
            client_id_number: row.client_id_number,
            client_email: row.client_email,
            primary_service: PrimaryService::from_db(&row.primary_service),
            service_label: row.service_label,
            start_time: parse_instant(&row.start_time)?,
            end_time: parse_instant(&row.end_time)?,
            status: row.status,
            notes: row.notes,
            signature: row.signature,
            coupon_code: row.coupon_code,
            base_price: row.base_price,
            discount_amount: row.discount_amount,
            final_price: row.final_price,
            visual_plan: row.visual_plan,
            created_at: parse_instant(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct IntervalRow {
    start_time: String,
    end_time: String,
    status: AppointmentStatus,
}

/// SQLite-backed store. Admin operations live here as inherent methods; the
/// booking flow only sees the [`StudioStore`] trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ── Services ──

    /// Every service, including inactive ones.
    pub async fn all_services(&self) -> Result<Vec<Service>, StoreError> {
        let sql = format!("SELECT {} FROM services ORDER BY sort_order ASC, id ASC", SERVICE_COLUMNS);
        Ok(sqlx::query_as::<_, Service>(&sql).fetch_all(&self.pool).await?)
    }

    async fn service_by_id(&self, id: i64) -> Result<Service, StoreError> {
        let sql = format!("SELECT {} FROM services WHERE id = ?", SERVICE_COLUMNS);
        sqlx::query_as::<_, Service>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn create_service(&self, req: &CreateServiceRequest) -> Result<Service, StoreError> {
        check_service(&req.name, req.price, req.duration_min)?;
        let id = sqlx::query(
            "INSERT INTO services (name, description, price, duration_min, category, pain_level, sort_order)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(req.name.trim())
        .bind(req.description.as_deref().unwrap_or(""))
        .bind(req.price)
        .bind(req.duration_min)
        .bind(req.category)
        .bind(req.pain_level.unwrap_or(3))
        .bind(req.sort_order.unwrap_or(0))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        self.service_by_id(id).await
    }

    pub async fn update_service(
        &self,
        id: i64,
        req: &UpdateServiceRequest,
    ) -> Result<Service, StoreError> {
        let current = self.service_by_id(id).await?;
        check_service(
            req.name.as_deref().unwrap_or(&current.name),
            req.price.unwrap_or(current.price),
            req.duration_min.unwrap_or(current.duration_min),
        )?;
        sqlx::query(
            "UPDATE services SET
                name = COALESCE(?, name),
                description = COALESCE(?, description),
                price = COALESCE(?, price),
                duration_min = COALESCE(?, duration_min),
                category = COALESCE(?, category),
                pain_level = COALESCE(?, pain_level),
                is_active = COALESCE(?, is_active),
                sort_order = COALESCE(?, sort_order)
             WHERE id = ?",
        )
        .bind(req.name.as_deref().map(str::trim))
        .bind(req.description.as_deref())
        .bind(req.price)
        .bind(req.duration_min)
        .bind(req.category)
        .bind(req.pain_level)
        .bind(req.is_active)
        .bind(req.sort_order)
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.service_by_id(id).await
    }

    // ── Jewelry ──

    async fn jewelry_by_id(&self, id: i64) -> Result<JewelryItem, StoreError> {
        let sql = format!("SELECT {} FROM jewelry WHERE id = ?", JEWELRY_COLUMNS);
        sqlx::query_as::<_, JewelryItem>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn create_jewelry(&self, req: &CreateJewelryRequest) -> Result<JewelryItem, StoreError> {
        check_jewelry(&req.name, req.price)?;
        let id = sqlx::query(
            "INSERT INTO jewelry (name, price, category, in_stock, image_url) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(req.name.trim())
        .bind(req.price)
        .bind(req.category.trim())
        .bind(req.in_stock.unwrap_or(true))
        .bind(req.image_url.as_deref())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        self.jewelry_by_id(id).await
    }

    pub async fn update_jewelry(
        &self,
        id: i64,
        req: &UpdateJewelryRequest,
    ) -> Result<JewelryItem, StoreError> {
        let current = self.jewelry_by_id(id).await?;
        check_jewelry(
            req.name.as_deref().unwrap_or(&current.name),
            req.price.unwrap_or(current.price),
        )?;
        sqlx::query(
            "UPDATE jewelry SET
                name = COALESCE(?, name),
                price = COALESCE(?, price),
                category = COALESCE(?, category),
                in_stock = COALESCE(?, in_stock),
                image_url = COALESCE(?, image_url)
             WHERE id = ?",
        )
        .bind(req.name.as_deref().map(str::trim))
        .bind(req.price)
        .bind(req.category.as_deref())
        .bind(req.in_stock)
        .bind(req.image_url.as_deref())
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.jewelry_by_id(id).await
    }

    // ── Coupons ──

    pub async fn list_coupons(&self) -> Result<Vec<Coupon>, StoreError> {
        let sql = format!("SELECT {} FROM coupons ORDER BY id DESC", COUPON_COLUMNS);
        Ok(sqlx::query_as::<_, Coupon>(&sql).fetch_all(&self.pool).await?)
    }

    async fn coupon_by_id(&self, id: i64) -> Result<Coupon, StoreError> {
        let sql = format!("SELECT {} FROM coupons WHERE id = ?", COUPON_COLUMNS);
        sqlx::query_as::<_, Coupon>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn create_coupon(&self, req: &CreateCouponRequest) -> Result<Coupon, StoreError> {
        let code = req.code.trim();
        if code.is_empty() {
            return Err(StoreError::Invalid("coupon code is required".into()));
        }
        let min_order_amount = req.min_order_amount.unwrap_or(0);
        let max_uses = req.max_uses.unwrap_or(0);
        check_coupon(req.discount_type, req.value, min_order_amount, max_uses)?;

        let id = sqlx::query(
            "INSERT INTO coupons (code, discount_type, value, min_order_amount, max_uses)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(code)
        .bind(req.discount_type)
        .bind(req.value)
        .bind(min_order_amount)
        .bind(max_uses)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return StoreError::Conflict(format!("coupon {} already exists", code));
                }
            }
            StoreError::Database(e)
        })?
        .last_insert_rowid();
        self.coupon_by_id(id).await
    }

    pub async fn update_coupon(&self, id: i64, req: &UpdateCouponRequest) -> Result<Coupon, StoreError> {
        let current = self.coupon_by_id(id).await?;
        check_coupon(
            current.discount_type,
            req.value.unwrap_or(current.value),
            req.min_order_amount.unwrap_or(current.min_order_amount),
            req.max_uses.unwrap_or(current.max_uses),
        )?;
        sqlx::query(
            "UPDATE coupons SET
                is_active = COALESCE(?, is_active),
                value = COALESCE(?, value),
                min_order_amount = COALESCE(?, min_order_amount),
                max_uses = COALESCE(?, max_uses)
             WHERE id = ?",
        )
        .bind(req.is_active)
        .bind(req.value)
        .bind(req.min_order_amount)
        .bind(req.max_uses)
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.coupon_by_id(id).await
    }

    // ── Settings ──

    pub async fn save_settings(&self, settings: &StudioSettings) -> Result<(), StoreError> {
        let hours = serde_json::to_string(&settings.working_hours)
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        let mut tx = self.pool.begin().await?;
        for (key, value) in [
            ("working_hours", hours),
            ("ai_stylist_enabled", settings.ai_stylist_enabled.to_string()),
        ] {
            sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ── Appointments ──

    async fn appointment_by_id(&self, id: i64) -> Result<Appointment, StoreError> {
        let sql = format!("SELECT {} FROM appointments WHERE id = ?", APPOINTMENT_COLUMNS);
        sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?
            .try_into()
    }

    /// Appointments on a studio-local `date` (all dates when `None`), by start time.
    pub async fn list_appointments(
        &self,
        date: Option<NaiveDate>,
        status: Option<AppointmentStatus>,
        tz: chrono_tz::Tz,
    ) -> Result<Vec<Appointment>, StoreError> {
        let bounds = match date {
            Some(d) => Some(day_bounds(d, tz).ok_or_else(|| {
                StoreError::Invalid(format!("date {} has no local midnight", d))
            })?),
            None => None,
        };
        let sql = format!(
            "SELECT {} FROM appointments
             WHERE (?1 IS NULL OR start_time BETWEEN ?1 AND ?2)
               AND (?3 IS NULL OR status = ?3)
             ORDER BY start_time ASC",
            APPOINTMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(bounds.map(|(from, _)| format_instant(from)))
            .bind(bounds.map(|(_, to)| format_instant(to)))
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Appointment::try_from).collect()
    }

    /// Only a pending appointment may be confirmed or cancelled.
    pub async fn update_appointment_status(
        &self,
        id: i64,
        next: AppointmentStatus,
    ) -> Result<Appointment, StoreError> {
        let current = self.appointment_by_id(id).await?;
        if !current.status.can_become(next) {
            return Err(StoreError::Conflict(format!(
                "appointment {} is {:?} and cannot become {:?}",
                id, current.status, next
            )));
        }
        let result = sqlx::query("UPDATE appointments SET status = ? WHERE id = ? AND status = ?")
            .bind(next)
            .bind(id)
            .bind(current.status)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "appointment {} changed concurrently",
                id
            )));
        }
        self.appointment_by_id(id).await
    }
}

fn check_service(name: &str, price: i64, duration_min: i64) -> Result<(), StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::Invalid("service name is required".into()));
    }
    if price < 0 {
        return Err(StoreError::Invalid("price must not be negative".into()));
    }
    if duration_min <= 0 {
        return Err(StoreError::Invalid("duration must be positive".into()));
    }
    Ok(())
}

fn check_jewelry(name: &str, price: i64) -> Result<(), StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::Invalid("jewelry name is required".into()));
    }
    if price < 0 {
        return Err(StoreError::Invalid("price must not be negative".into()));
    }
    Ok(())
}

fn check_coupon(
    discount_type: DiscountType,
    value: f64,
    min_order_amount: i64,
    max_uses: i64,
) -> Result<(), StoreError> {
    if !value.is_finite() || value < 0.0 {
        return Err(StoreError::Invalid("discount value must not be negative".into()));
    }
    if discount_type == DiscountType::Percentage && value > 100.0 {
        return Err(StoreError::Invalid(
            "percentage discount must be between 0 and 100".into(),
        ));
    }
    if min_order_amount < 0 || max_uses < 0 {
        return Err(StoreError::Invalid(
            "minimum order and usage limit must not be negative".into(),
        ));
    }
    Ok(())
}

#[async_trait]
impl StudioStore for SqliteStore {
    async fn list_services(&self) -> Result<Vec<Service>, StoreError> {
        let sql = format!(
            "SELECT {} FROM services WHERE is_active = 1 ORDER BY sort_order ASC, id ASC",
            SERVICE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Service>(&sql).fetch_all(&self.pool).await?)
    }

    async fn list_jewelry(&self) -> Result<Vec<JewelryItem>, StoreError> {
        let sql = format!("SELECT {} FROM jewelry ORDER BY id ASC", JEWELRY_COLUMNS);
        Ok(sqlx::query_as::<_, JewelryItem>(&sql).fetch_all(&self.pool).await?)
    }

    async fn studio_settings(&self) -> Result<StudioSettings, StoreError> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await?;

        let mut settings = StudioSettings {
            working_hours: WorkingHours::studio_default(),
            ai_stylist_enabled: true,
        };
        for (key, value) in rows {
            match key.as_str() {
                "working_hours" => {
                    settings.working_hours = serde_json::from_str(&value)
                        .map_err(|e| StoreError::Corrupt(format!("working_hours: {}", e)))?;
                }
                "ai_stylist_enabled" => settings.ai_stylist_enabled = value == "true",
                _ => {}
            }
        }
        Ok(settings)
    }

    async fn bookings_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BookedInterval>, StoreError> {
        let rows = sqlx::query_as::<_, IntervalRow>(
            "SELECT start_time, end_time, status FROM appointments
             WHERE status != 'cancelled' AND start_time BETWEEN ? AND ?
             ORDER BY start_time ASC",
        )
        .bind(format_instant(from))
        .bind(format_instant(to))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(BookedInterval {
                    start_time: parse_instant(&r.start_time)?,
                    end_time: parse_instant(&r.end_time)?,
                    status: r.status,
                })
            })
            .collect()
    }

    async fn create_appointment(&self, new: &NewAppointment) -> Result<Appointment, StoreError> {
        let mut tx = self.pool.begin().await?;

        if let Some(code) = &new.coupon_code {
            let taken = sqlx::query(
                "UPDATE coupons SET used_count = used_count + 1
                 WHERE code = ? COLLATE NOCASE AND is_active = 1
                   AND (max_uses = 0 OR used_count < max_uses)",
            )
            .bind(code)
            .execute(&mut *tx)
            .await?;
            if taken.rows_affected() == 0 {
                return Err(StoreError::CouponUnavailable(code.clone()));
            }
        }

        let id = sqlx::query(
            "INSERT INTO appointments (
                client_name, client_phone, client_id_number, client_email, primary_service,
                service_label, start_time, end_time, status, notes, signature, coupon_code,
                base_price, discount_amount, final_price, visual_plan, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&new.client_name)
        .bind(&new.client_phone)
        .bind(&new.client_id_number)
        .bind(new.client_email.as_deref())
        .bind(new.primary_service.as_db())
        .bind(&new.service_label)
        .bind(format_instant(new.start_time))
        .bind(format_instant(new.end_time))
        .bind(new.notes.as_deref())
        .bind(&new.signature)
        .bind(new.coupon_code.as_deref())
        .bind(new.base_price)
        .bind(new.discount_amount)
        .bind(new.final_price)
        .bind(new.visual_plan.as_deref())
        .bind(format_instant(Utc::now()))
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        tx.commit().await?;

        tracing::info!("Appointment {} created for {}", id, format_instant(new.start_time));
        self.appointment_by_id(id).await
    }

    async fn find_coupon(&self, code: &str) -> Result<Option<Coupon>, StoreError> {
        let sql = format!("SELECT {} FROM coupons WHERE code = ? COLLATE NOCASE", COUPON_COLUMNS);
        Ok(sqlx::query_as::<_, Coupon>(&sql)
            .bind(code.trim())
            .fetch_optional(&self.pool)
            .await?)
    }
}
