use common::{BatchId, Result, SubmissionUnit, TaskSet};
use tracing::{info, warn};

use crate::scheduler::Scheduler;

/// Reenvía en un solo submit todas las tareas reintentables de esta pasada.
///
/// El script es el mismo texto del submit original; sólo cambia la
/// restricción `-t`. Devuelve el nuevo batch si hubo reenvío.
pub async fn resubmit_failed<S: Scheduler + ?Sized>(
    scheduler: &S,
    script: &str,
    tasks: &mut TaskSet,
) -> Result<Option<BatchId>> {
    let retry = tasks.select_retryable();
    if retry.is_empty() {
        return Ok(None);
    }

    for index in &retry {
        if let Some(t) = tasks.get(*index) {
            warn!(
                "{} falló con {:?}, reintento {}/{}",
                t.job_id(),
                t.exit_code,
                t.retry_count + 1,
                t.max_retry
            );
        }
    }

    let restriction = SubmissionUnit::restriction_for(&retry);
    let batch_id = scheduler.submit(script, Some(&restriction)).await?;
    info!("job enviado: {}[{}]", batch_id, restriction);

    for index in retry {
        tasks.resubmit(index, &batch_id)?;
    }
    Ok(Some(batch_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeScheduler;

    #[tokio::test]
    async fn sin_fallas_no_hay_reenvio() {
        let sched = FakeScheduler::new();
        let mut tasks = TaskSet::new();
        tasks.init("5", [1, 2], 3).unwrap();
        tasks.set_exit_code(1, 0).unwrap();

        assert_eq!(resubmit_failed(&sched, "script", &mut tasks).await.unwrap(), None);
        assert!(sched.submissions().is_empty());
    }

    #[tokio::test]
    async fn reenvio_agrupado_en_un_solo_submit() {
        let sched = FakeScheduler::new();
        let mut tasks = TaskSet::new();
        tasks.init("5", [1, 2, 3, 4], 1).unwrap();
        tasks.set_exit_code(4, 2).unwrap();
        tasks.set_exit_code(1, 1).unwrap();
        tasks.set_exit_code(2, 0).unwrap();

        let new_id = resubmit_failed(&sched, "script", &mut tasks)
            .await
            .unwrap()
            .unwrap();

        let subs = sched.submissions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].script, "script");
        assert_eq!(subs[0].restriction.as_deref(), Some("1,4"));

        for i in [1, 4] {
            let t = tasks.get(i).unwrap();
            assert_eq!(t.batch_id, new_id);
            assert_eq!(t.retry_count, 1);
            assert_eq!(t.exit_code, None);
        }
        assert_eq!(tasks.get(2).unwrap().batch_id, "5");
        assert_eq!(tasks.get(3).unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn error_de_submit_se_propaga_sin_tocar_tareas() {
        let sched = FakeScheduler::new();
        sched.fail_submit(true);
        let mut tasks = TaskSet::new();
        tasks.init("5", [1], 1).unwrap();
        tasks.set_exit_code(1, 1).unwrap();

        assert!(resubmit_failed(&sched, "script", &mut tasks).await.is_err());
        let t = tasks.get(1).unwrap();
        assert_eq!(t.batch_id, "5");
        assert_eq!(t.exit_code, Some(1));
    }
}
